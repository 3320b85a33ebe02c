//! Static in-memory backend.
//!
//! Values come from the config file (`kind = "static"` with an inline
//! `values` table) or from programmatic `set`/`remove` calls. Every
//! mutation bumps a version counter published on a `watch` channel, which
//! is what `watch_prefix` blocks on — this backend is also the workhorse
//! of the engine's own tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::{key_in_prefix, Backend};
use crate::error::BackendError;
use crate::types::normalize_path;

#[derive(Debug, Clone)]
pub struct StaticBackend {
    values: Arc<Mutex<BTreeMap<String, String>>>,
    version: Arc<watch::Sender<u64>>,
}

impl Default for StaticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticBackend {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            values: Arc::new(Mutex::new(BTreeMap::new())),
            version: Arc::new(version),
        }
    }

    pub fn with_values(values: BTreeMap<String, String>) -> Self {
        let backend = Self::new();
        {
            let mut guard = backend.values.lock().unwrap_or_else(|e| e.into_inner());
            for (key, value) in values {
                guard.insert(normalize_path(&key), value);
            }
        }
        backend
    }

    /// Insert or overwrite a key and notify watchers.
    pub fn set(&self, key: &str, value: &str) {
        {
            let mut guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
            guard.insert(normalize_path(key), value.to_string());
        }
        self.version.send_modify(|v| *v += 1);
    }

    /// Remove a key and notify watchers.
    pub fn remove(&self, key: &str) {
        let removed = {
            let mut guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
            guard.remove(&normalize_path(key)).is_some()
        };
        if removed {
            self.version.send_modify(|v| *v += 1);
        }
    }

    fn current_version(&self) -> u64 {
        *self.version.subscribe().borrow()
    }
}

#[async_trait]
impl Backend for StaticBackend {
    async fn fetch_values(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, String>, BackendError> {
        let guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard
            .iter()
            .filter(|(key, _)| keys.iter().any(|prefix| key_in_prefix(key, prefix)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn watch_prefix(
        &self,
        _prefix: &str,
        _keys: &[String],
        token: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, BackendError> {
        let mut rx = self.version.subscribe();
        // Token 0 means "no change seen yet", so any mutation at all fires
        // the watch. Returning for a change the caller has already fetched
        // costs one redundant cycle; missing one would lose an update.
        loop {
            let current = *rx.borrow();
            if current > token {
                return Ok(current);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(BackendError::Canceled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Backend dropped; nothing left to watch.
                        return Err(BackendError::Canceled);
                    }
                }
            }
        }
    }
}
