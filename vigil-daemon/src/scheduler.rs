//! Per-backend watch and interval loops.
//!
//! Each loop pushes its backend's index onto the shared readiness channel
//! when a re-fetch is due. Both loops may run for one backend: watch-driven
//! updates plus an interval reconciliation safety net. Every loop observes
//! the resource's cancellation token within one scheduling step.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vigil_core::backend::Backend;
use vigil_core::error::BackendError;
use vigil_core::types::{BackendSettings, DEFAULT_INTERVAL_SECS};

/// Delay before retrying a failed watch call.
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Blocking-watch loop: push on change, retry on recoverable errors.
///
/// A recoverable error pushes the backend once so a reconciliation runs
/// with stale-but-safe data before the retry sleep.
pub(crate) async fn watch_loop(
    idx: usize,
    backend: Arc<dyn Backend>,
    settings: BackendSettings,
    ready: mpsc::Sender<usize>,
    cancel: CancellationToken,
) {
    let mut token = 0u64;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match backend
            .watch_prefix(&settings.prefix, &settings.watch_keys, token, &cancel)
            .await
        {
            Ok(new_token) => {
                token = new_token;
                if ready.send(idx).await.is_err() {
                    return;
                }
            }
            Err(BackendError::Canceled) => return,
            Err(BackendError::WatchUnsupported) => {
                // The backend still has to make forward progress. If no
                // timer loop is configured, become one; otherwise the
                // existing timer already covers it.
                if settings.interval > 0 {
                    tracing::debug!(
                        backend = %settings.name,
                        "backend cannot watch, leaving polling to the timer loop",
                    );
                    return;
                }
                tracing::debug!(
                    backend = %settings.name,
                    interval_secs = DEFAULT_INTERVAL_SECS,
                    "backend cannot watch, polling instead",
                );
                interval_loop(idx, DEFAULT_INTERVAL_SECS, ready, cancel).await;
                return;
            }
            Err(err) => {
                tracing::warn!(
                    backend = %settings.name,
                    error = %err,
                    "watch failed, retrying",
                );
                if ready.send(idx).await.is_err() {
                    return;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
                }
            }
        }
    }
}

/// Timer loop: push every `interval` seconds.
pub(crate) async fn interval_loop(
    idx: usize,
    secs: u64,
    ready: mpsc::Sender<usize>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The initial convergence already fetched; skip the immediate tick.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                if ready.send(idx).await.is_err() {
                    return;
                }
            }
        }
    }
}
