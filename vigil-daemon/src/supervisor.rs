//! Process-level supervision: one generation of resources at a time.
//!
//! The supervisor starts a monitor task per resource, restarts any that
//! fail after a random backoff, swaps whole generations on reload, and
//! keeps the PID file in step with the daemon lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vigil_core::types::Config;

use crate::error::{io_err, DaemonError};
use crate::resource::{backoff_delay, Resource};

struct RunningResource {
    name: String,
    cancel: CancellationToken,
    signal_tx: mpsc::Sender<Signal>,
    handle: JoinHandle<()>,
}

/// Owns the currently running generation of resources.
pub struct Supervisor {
    running: Vec<RunningResource>,
    pid_file: Option<PathBuf>,
}

impl Supervisor {
    /// Start every resource in `config` and write the PID file if one is
    /// configured. `pid_file` overrides the config's own setting.
    pub fn start(config: Config, pid_file: Option<PathBuf>) -> Result<Self, DaemonError> {
        let pid_file = pid_file.or_else(|| config.pid_file.clone());
        if let Some(path) = &pid_file {
            write_pid_file(path)?;
        }
        let running = start_generation(&config)?;
        Ok(Self { running, pid_file })
    }

    /// Swap to a new configuration: drain the current generation, then
    /// start the next one. The PID file is rewritten so restarts under a
    /// process manager stay observable.
    pub async fn reload(&mut self, config: Config) -> Result<(), DaemonError> {
        tracing::info!(resources = config.resources.len(), "reloading configuration");
        self.drain().await;
        if let Some(path) = &self.pid_file {
            write_pid_file(path)?;
        }
        self.running = start_generation(&config)?;
        Ok(())
    }

    /// Forward a signal to every resource's managed process. Best-effort:
    /// a resource that is not draining its queue (finished, or stuck before
    /// steady state) drops the signal rather than blocking the fan-out.
    pub fn send_signal(&self, signal: Signal) {
        for running in &self.running {
            if let Err(err) = running.signal_tx.try_send(signal) {
                tracing::debug!(
                    resource = %running.name,
                    signal = %signal,
                    reason = %err,
                    "signal dropped",
                );
            }
        }
    }

    /// Cancel everything, wait for the monitors to drain, and remove the
    /// PID file.
    pub async fn stop(&mut self) {
        self.drain().await;
        if let Some(path) = self.pid_file.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %err, "pid file removal failed");
            }
        }
    }

    /// Wait for every resource to finish naturally. Resources with a
    /// managed process never do; this is the run-to-completion path for
    /// render-once invocations.
    pub async fn join(&mut self) {
        for running in self.running.drain(..) {
            if running.handle.await.is_err() {
                tracing::error!(resource = %running.name, "supervision task panicked");
            }
        }
        if let Some(path) = self.pid_file.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %err, "pid file removal failed");
            }
        }
    }

    async fn drain(&mut self) {
        for running in &self.running {
            running.cancel.cancel();
        }
        for running in self.running.drain(..) {
            if running.handle.await.is_err() {
                tracing::error!(resource = %running.name, "supervision task panicked");
            }
        }
    }
}

fn start_generation(config: &Config) -> Result<Vec<RunningResource>, DaemonError> {
    let mut running = Vec::with_capacity(config.resources.len());
    for spec in &config.resources {
        let name = spec.name.to_string();
        let resource = Arc::new(Resource::new(spec.clone())?);
        let cancel = CancellationToken::new();
        let signal_tx = resource.signal_sender();
        let handle = tokio::spawn(supervise(resource, cancel.clone()));
        tracing::info!(resource = %name, "resource started");
        running.push(RunningResource {
            name,
            cancel,
            signal_tx,
            handle,
        });
    }
    Ok(running)
}

/// Run one resource's monitor, restarting it after a backoff whenever it
/// ends in failure. Clean completion and cancellation both end supervision.
async fn supervise(resource: Arc<Resource>, cancel: CancellationToken) {
    loop {
        resource.monitor(cancel.clone()).await;
        if cancel.is_cancelled() || !resource.failed() {
            return;
        }
        let delay = backoff_delay();
        tracing::warn!(
            resource = %resource.name(),
            delay_secs = delay.as_secs(),
            "resource failed, restarting",
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn write_pid_file(path: &std::path::Path) -> Result<(), DaemonError> {
    std::fs::write(path, format!("{}\n", std::process::id()))
        .map_err(|source| io_err(path, source))
}
