//! One resource: its backends, stores, templates, and managed process.
//!
//! `Resource::monitor` drives the full lifecycle — initial convergence,
//! the start hook, process spawn, and the steady-state dispatch loop — and
//! returns when the resource finishes naturally, fails, or is cancelled.
//! The supervisor decides whether a return means "restart" or "done".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use vigil_core::backend::Backend;
use vigil_core::types::{ExecSpec, ResourceSpec};
use vigil_exec::Executor;
use vigil_render::Renderer;
use vigil_store::StoreSet;

use crate::error::DaemonError;
use crate::scheduler;

/// Upper bound (exclusive) for convergence-retry and restart backoff sleeps.
pub(crate) const BACKOFF_BOUND_SECS: u64 = 30;

pub(crate) fn backoff_delay() -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(0..BACKOFF_BOUND_SECS))
}

/// A resource wired up and ready to monitor.
pub struct Resource {
    spec: ResourceSpec,
    backends: Vec<Arc<dyn Backend>>,
    stores: StoreSet,
    renderers: Vec<Renderer>,
    backend_names: Vec<String>,
    failed: AtomicBool,
    /// Receiver side of the signal fan-out; taken by `monitor` and put back
    /// on return so a supervisor restart can re-enter.
    signal_rx: Mutex<Option<mpsc::Receiver<Signal>>>,
    signal_tx: mpsc::Sender<Signal>,
}

impl Resource {
    /// Connect every declared backend and build the stores and renderers.
    pub fn new(spec: ResourceSpec) -> Result<Self, DaemonError> {
        let mut handles: Vec<Arc<dyn Backend>> = Vec::with_capacity(spec.backends.len());
        for block in &spec.backends {
            handles.push(Arc::from(block.connect()?));
        }
        Ok(Self::with_handles(spec, handles))
    }

    /// Build a resource around pre-opened backend handles.
    pub fn with_handles(spec: ResourceSpec, backends: Vec<Arc<dyn Backend>>) -> Self {
        let stores = StoreSet::new(backends.len());
        let renderers = spec
            .templates
            .iter()
            .map(|tmpl| Renderer::new(tmpl.clone(), stores.merged()))
            .collect();
        let backend_names = spec
            .backends
            .iter()
            .map(|block| block.settings.name.clone())
            .collect();
        let (signal_tx, signal_rx) = mpsc::channel(16);
        Self {
            spec,
            backends,
            stores,
            renderers,
            backend_names,
            failed: AtomicBool::new(false),
            signal_rx: Mutex::new(Some(signal_rx)),
            signal_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name.0
    }

    /// True when the last `monitor` run ended in failure rather than
    /// natural completion.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Handle for forwarding OS signals to the managed process.
    pub fn signal_sender(&self) -> mpsc::Sender<Signal> {
        self.signal_tx.clone()
    }

    fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    /// Run the resource until it completes, fails, or `cancel` fires.
    pub async fn monitor(&self, cancel: CancellationToken) {
        self.failed.store(false, Ordering::SeqCst);
        let mut signal_rx = match self.signal_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                // A second monitor on the same resource is a bug upstream.
                tracing::error!(resource = %self.spec.name, "monitor already running");
                self.mark_failed();
                return;
            }
        };

        self.run(cancel, &mut signal_rx).await;

        *self.signal_rx.lock().await = Some(signal_rx);
    }

    async fn run(&self, cancel: CancellationToken, signal_rx: &mut mpsc::Receiver<Signal>) {
        // Initial convergence: retry with a random backoff until every
        // backend has been fetched and every template installed.
        loop {
            match self.converge_all().await {
                Ok(()) => break,
                Err(err) => {
                    let delay = backoff_delay();
                    tracing::warn!(
                        resource = %self.spec.name,
                        error = %err,
                        delay_secs = delay.as_secs(),
                        "initial convergence failed, retrying",
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        tracing::info!(resource = %self.spec.name, "initial convergence complete");

        if let Some(cmd) = &self.spec.start_cmd {
            if let Err(err) = run_hook(cmd).await {
                tracing::error!(
                    resource = %self.spec.name,
                    error = %err,
                    "start command failed",
                );
                self.mark_failed();
                return;
            }
        }

        let exec_spec = self.spec.exec.clone().unwrap_or_else(ExecSpec::default);
        let exec = match Executor::spawn(&exec_spec, &cancel).await {
            Ok(exec) => Arc::new(exec),
            Err(err) => {
                tracing::error!(
                    resource = %self.spec.name,
                    error = %err,
                    "failed to start managed process",
                );
                self.mark_failed();
                return;
            }
        };

        self.steady_state(cancel, signal_rx, exec).await;
    }

    /// Fetch every backend, rebuild the merged view, and install every
    /// template. Any error aborts the pass.
    async fn converge_all(&self) -> Result<(), DaemonError> {
        for (idx, backend) in self.backends.iter().enumerate() {
            self.stores
                .fetch(idx, backend.as_ref(), &self.spec.backends[idx].settings)
                .await?;
        }
        self.stores.rebuild(&self.backend_names);
        for renderer in &self.renderers {
            renderer.sync().await?;
        }
        Ok(())
    }

    async fn steady_state(
        &self,
        cancel: CancellationToken,
        signal_rx: &mut mpsc::Receiver<Signal>,
        exec: Arc<Executor>,
    ) {
        let token = cancel.child_token();

        // Process exit (other than a reload swap) tears the resource down.
        let watcher = {
            let exec = Arc::clone(&exec);
            let token = token.clone();
            let cancel_watch = token.clone();
            tokio::spawn(async move {
                let unexpected = exec.wait(&cancel_watch).await;
                if unexpected {
                    token.cancel();
                }
                unexpected
            })
        };

        let (ready_tx, mut ready_rx) = mpsc::channel::<usize>(self.backends.len().max(1) * 2);
        let mut schedulers = Vec::new();
        for (idx, backend) in self.backends.iter().enumerate() {
            let settings = &self.spec.backends[idx].settings;
            if settings.onetime {
                continue;
            }
            if settings.watch {
                schedulers.push(tokio::spawn(scheduler::watch_loop(
                    idx,
                    Arc::clone(backend),
                    settings.clone(),
                    ready_tx.clone(),
                    token.clone(),
                )));
            }
            if settings.interval > 0 {
                schedulers.push(tokio::spawn(scheduler::interval_loop(
                    idx,
                    settings.interval,
                    ready_tx.clone(),
                    token.clone(),
                )));
            }
        }
        // Drop our copy so `ready_rx` closes once every scheduler is done.
        drop(ready_tx);

        let mut backends_done = false;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(signal) = signal_rx.recv() => {
                    if let Err(err) = exec.signal(signal).await {
                        tracing::warn!(
                            resource = %self.spec.name,
                            signal = %signal,
                            error = %err,
                            "signal delivery failed",
                        );
                    }
                }
                ready = ready_rx.recv(), if !backends_done => {
                    match ready {
                        Some(idx) => self.cycle_backend(idx, &exec).await,
                        None => {
                            // Every scheduler finished. A render-only
                            // resource is now complete; one with a managed
                            // process keeps serving signals and exits.
                            if exec.is_managing() {
                                backends_done = true;
                            } else {
                                break;
                            }
                        }
                    }
                }
            }
        }

        token.cancel();
        for handle in schedulers {
            let _ = handle.await;
        }
        let unexpected_exit = matches!(watcher.await, Ok(true));
        if unexpected_exit && !cancel.is_cancelled() {
            tracing::error!(resource = %self.spec.name, "managed process exited");
            self.mark_failed();
        }
        if let Err(err) = exec.stop().await {
            tracing::warn!(resource = %self.spec.name, error = %err, "stop failed");
        }
    }

    /// One incremental cycle: re-fetch a single backend, rebuild the merged
    /// view, and re-sync every template. Errors are logged, not fatal; the
    /// previous render stays installed.
    async fn cycle_backend(&self, idx: usize, exec: &Executor) {
        let settings = &self.spec.backends[idx].settings;
        if let Err(err) = self
            .stores
            .fetch(idx, self.backends[idx].as_ref(), settings)
            .await
        {
            tracing::warn!(
                resource = %self.spec.name,
                backend = %settings.name,
                error = %err,
                "re-fetch failed, keeping previous values",
            );
            return;
        }
        self.stores.rebuild(&self.backend_names);

        let mut changed = false;
        for renderer in &self.renderers {
            match renderer.sync().await {
                Ok(outcome) => changed |= outcome.changed,
                Err(err) => {
                    tracing::warn!(
                        resource = %self.spec.name,
                        dst = %renderer.spec().dst.display(),
                        error = %err,
                        "template sync failed",
                    );
                }
            }
        }
        if !changed {
            return;
        }

        if let Err(err) = exec.reload().await {
            tracing::warn!(resource = %self.spec.name, error = %err, "reload failed");
        }
        if let Some(cmd) = &self.spec.reload_cmd {
            if let Err(err) = run_hook(cmd).await {
                tracing::warn!(
                    resource = %self.spec.name,
                    error = %err,
                    "reload command failed",
                );
            }
        }
    }
}

/// Run a hook command through the shell and require a zero exit.
async fn run_hook(cmd: &str) -> Result<(), DaemonError> {
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .status()
        .await
        .map_err(|source| crate::error::io_err(cmd, source))?;
    if status.success() {
        Ok(())
    } else {
        Err(DaemonError::Command {
            cmd: cmd.to_string(),
            status: status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hook_reports_exit_status() {
        run_hook("true").await.expect("true succeeds");
        let err = run_hook("exit 3").await.expect_err("non-zero fails");
        match err {
            DaemonError::Command { status, .. } => assert_eq!(status, 3),
            other => panic!("unexpected error: {other}"),
        }
    }
}
