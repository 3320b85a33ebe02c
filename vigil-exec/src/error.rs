//! Error types for vigil-exec.

use thiserror::Error;

/// All errors that can arise from the executor.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command line could not be split into words.
    #[error("bad command line '{cmd}': {reason}")]
    BadCommand { cmd: String, reason: String },

    /// A configured signal name is not a recognized signal.
    #[error("unknown signal '{name}'")]
    BadSignal { name: String },

    /// fork/exec of the command line failed.
    #[error("failed to spawn '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    /// Delivering a signal to the child failed.
    #[error("failed to signal child: {0}")]
    Signal(#[source] nix::Error),

    /// The serialized command loop is gone (executor already stopped).
    #[error("executor command loop is closed")]
    Closed,
}
