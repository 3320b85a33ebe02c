//! vigil-daemon — resource monitors and the process supervisor.
//!
//! A resource ties backends, a merge store, templates, and one managed
//! process together; the supervisor runs all declared resources, restarts
//! failed ones, and swaps generations on configuration reload.

pub mod error;
pub mod resource;
mod scheduler;
pub mod supervisor;

pub use error::DaemonError;
pub use resource::Resource;
pub use supervisor::Supervisor;
