use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the resource monitor and supervisor.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] vigil_core::ConfigError),

    #[error("backend error: {0}")]
    Backend(#[from] vigil_core::BackendError),

    #[error("render error: {0}")]
    Render(#[from] vigil_render::RenderError),

    #[error("exec error: {0}")]
    Exec(#[from] vigil_exec::ExecError),

    #[error("command '{cmd}' exited with {status}")]
    Command { cmd: String, status: i32 },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
