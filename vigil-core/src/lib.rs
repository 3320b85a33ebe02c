//! vigil-core — domain types, configuration, and the backend interface.

pub mod backend;
pub mod backends;
pub mod config;
pub mod error;
pub mod types;

pub use backend::{Backend, BackendBlock, BackendKind};
pub use error::{BackendError, ConfigError};
pub use types::{
    BackendSettings, Config, ExecSpec, KVPair, ResourceName, ResourceSpec, TemplateSpec,
};
