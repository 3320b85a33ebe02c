//! Environment-variable backend.
//!
//! `MY_SERVICE_PORT` is exposed as `/my/service/port`. Watching the process
//! environment is meaningless, so `watch_prefix` reports
//! [`BackendError::WatchUnsupported`] and a resource using this kind relies
//! on interval polling alone.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backend::{key_in_prefix, Backend};
use crate::error::BackendError;

#[derive(Debug, Default)]
pub struct EnvBackend;

impl EnvBackend {
    pub fn new() -> Self {
        Self
    }
}

/// `MY_KEY` -> `/my/key`.
fn key_for_var(var: &str) -> String {
    let mut key = String::with_capacity(var.len() + 1);
    key.push('/');
    key.push_str(&var.to_ascii_lowercase().replace('_', "/"));
    key
}

#[async_trait]
impl Backend for EnvBackend {
    async fn fetch_values(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, String>, BackendError> {
        let mut out = HashMap::new();
        for (var, value) in std::env::vars() {
            let key = key_for_var(&var);
            if keys.iter().any(|prefix| key_in_prefix(&key, prefix)) {
                out.insert(key, value);
            }
        }
        Ok(out)
    }

    async fn watch_prefix(
        &self,
        _prefix: &str,
        _keys: &[String],
        _token: u64,
        _cancel: &CancellationToken,
    ) -> Result<u64, BackendError> {
        Err(BackendError::WatchUnsupported)
    }
}
