//! Backend connector interface and the tagged configuration union.
//!
//! A backend is "fetch values for a set of key prefixes" plus "block until
//! one of these prefixes changes, returning an opaque change token". The
//! wire protocol behind those two calls is deliberately out of scope; the
//! built-in kinds under [`crate::backends`] are enough to run and test the
//! engine.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::backends::{env::EnvBackend, file::FileBackend, statik::StaticBackend};
use crate::error::BackendError;
use crate::types::BackendSettings;

/// A live connection to one key-value source.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch current values for every key under the given prefixes.
    /// Returned keys are absolute and slash-rooted.
    async fn fetch_values(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, String>, BackendError>;

    /// Block until any watched key changes, returning a new change token.
    ///
    /// Must observe `cancel` promptly and return [`BackendError::Canceled`];
    /// kinds that cannot watch return [`BackendError::WatchUnsupported`].
    async fn watch_prefix(
        &self,
        prefix: &str,
        keys: &[String],
        token: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, BackendError>;
}

/// True when `key` equals `prefix` or sits underneath it.
pub fn key_in_prefix(key: &str, prefix: &str) -> bool {
    if prefix.is_empty() || prefix == "/" {
        return true;
    }
    key == prefix || key.starts_with(&format!("{prefix}/"))
}

// ---------------------------------------------------------------------------
// Configuration union — one tagged enum, not N optional pointers
// ---------------------------------------------------------------------------

/// Kind-specific connection payloads, selected by `kind = "..."` in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendKind {
    /// Process environment variables; watch unsupported.
    Env {},

    /// A TOML document on disk, flattened into keys; watched via notify.
    File { path: std::path::PathBuf },

    /// Inline values from the config file; programmatically mutable, which
    /// also makes this the backend the test suite drives.
    Static {
        #[serde(default)]
        values: std::collections::BTreeMap<String, String>,
    },
}

impl BackendKind {
    /// Stable kind name, used to default the backend's log name.
    pub fn kind_name(&self) -> &'static str {
        match self {
            BackendKind::Env {} => "env",
            BackendKind::File { .. } => "file",
            BackendKind::Static { .. } => "static",
        }
    }
}

/// One `[[resource.backend]]` block: shared scheduling settings plus the
/// kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendBlock {
    #[serde(flatten)]
    pub settings: BackendSettings,

    #[serde(flatten)]
    pub kind: BackendKind,
}

impl BackendBlock {
    /// Open a live handle for this block's kind.
    pub fn connect(&self) -> Result<Box<dyn Backend>, BackendError> {
        match &self.kind {
            BackendKind::Env {} => Ok(Box::new(EnvBackend::new())),
            BackendKind::File { path } => Ok(Box::new(FileBackend::new(path.clone()))),
            BackendKind::Static { values } => {
                Ok(Box::new(StaticBackend::with_values(values.clone())))
            }
        }
    }
}
