//! Per-backend stores plus the resource-wide merged view.
//!
//! `fetch` replaces one backend's private store wholesale; `rebuild`
//! re-derives the merged store from every private store in backend
//! declaration order. A key present in more than one private store is a
//! collision: the later backend wins and a warning is logged, never an
//! error.

use std::collections::HashMap;
use std::sync::Arc;

use vigil_core::backend::Backend;
use vigil_core::error::BackendError;
use vigil_core::types::{normalize_path, BackendSettings};

use crate::store::Store;

pub struct StoreSet {
    backends: Vec<Store>,
    merged: Arc<Store>,
}

impl StoreSet {
    /// One private store per backend, in declaration order.
    pub fn new(backend_count: usize) -> Self {
        Self {
            backends: (0..backend_count).map(|_| Store::new()).collect(),
            merged: Arc::new(Store::new()),
        }
    }

    /// The merged resource-wide view handed to template functions.
    pub fn merged(&self) -> Arc<Store> {
        Arc::clone(&self.merged)
    }

    pub fn backend_store(&self, idx: usize) -> &Store {
        &self.backends[idx]
    }

    /// Fetch one backend's values and replace its private store.
    ///
    /// Keys are requested prefixed with `settings.prefix` and re-rooted at
    /// `/` on the way back in.
    pub async fn fetch(
        &self,
        idx: usize,
        backend: &dyn Backend,
        settings: &BackendSettings,
    ) -> Result<(), BackendError> {
        let prefixed: Vec<String> = settings
            .keys
            .iter()
            .map(|key| join_prefix(&settings.prefix, key))
            .collect();
        let values = backend.fetch_values(&prefixed).await?;
        self.backends[idx].replace_all(reroot(values, &settings.prefix));
        Ok(())
    }

    /// Rebuild the merged store from the private stores in declared order.
    /// `names` are the backend log names, index-aligned with the stores.
    pub fn rebuild(&self, names: &[String]) {
        self.merged.clear();
        for (idx, store) in self.backends.iter().enumerate() {
            for pair in store.get_all("/") {
                if let Some(previous) = self.merged.insert(&pair.key, pair.value.clone()) {
                    tracing::warn!(
                        key = %pair.key,
                        backend = %names.get(idx).map(String::as_str).unwrap_or("?"),
                        old = %previous,
                        new = %pair.value,
                        "key collision, later backend wins",
                    );
                }
            }
        }
    }
}

fn join_prefix(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else if key == "/" {
        prefix.to_string()
    } else {
        format!("{prefix}{key}")
    }
}

fn reroot(
    values: HashMap<String, String>,
    prefix: &str,
) -> impl Iterator<Item = (String, String)> + '_ {
    values.into_iter().map(move |(key, value)| {
        let stripped = if prefix.is_empty() {
            key
        } else {
            match key.strip_prefix(prefix) {
                Some(rest) => normalize_path(rest),
                None => key,
            }
        };
        (stripped, value)
    })
}
