//! Error types for vigil-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error on load — includes file path and line context from toml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A semantic problem the TOML deserializer cannot catch.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// Errors surfaced by backend connectors.
///
/// `Canceled` and `WatchUnsupported` are sentinels, not failures: the first
/// is a clean shutdown of a blocking watch, the second tells the caller to
/// rely on interval polling alone.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The watch observed cancellation and returned promptly.
    #[error("watch canceled")]
    Canceled,

    /// This backend kind cannot watch; poll on an interval instead.
    #[error("watch not supported by this backend")]
    WatchUnsupported,

    /// I/O failure talking to the backing source.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing document exists but does not parse.
    #[error("failed to parse backend data at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Filesystem watcher error (file backend).
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// Convenience constructor for [`BackendError::Io`].
pub(crate) fn backend_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BackendError {
    BackendError::Io {
        path: path.into(),
        source,
    }
}
