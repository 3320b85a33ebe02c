//! Error types for vigil-render.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while staging and syncing one destination.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The source template does not exist.
    #[error("missing template: {path}")]
    MissingTemplate { path: PathBuf },

    /// The destination directory does not exist and `mkdirs` is off.
    #[error("destination directory missing: {path}")]
    DstDirMissing { path: PathBuf },

    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured check command rejected the staged file.
    #[error("check command failed with {status}: {cmd}")]
    CheckFailed { cmd: String, status: i32 },

    /// The configured reload command failed after install.
    #[error("reload command failed with {status}: {cmd}")]
    ReloadFailed { cmd: String, status: i32 },

    /// chown on the staged or installed file failed.
    #[error("chown failed at {path}: {source}")]
    Chown {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
}

/// Convenience constructor for [`RenderError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}
