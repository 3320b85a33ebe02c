//! Ordered, prefix-searchable key-value store.
//!
//! One [`Store`] holds one backend's latest fetch (or the resource-wide
//! merged view). Reads are safe under the single-writer/multi-reader model:
//! the dispatch loop is the only writer, template functions are the readers.

use std::collections::BTreeMap;
use std::sync::RwLock;

use vigil_core::backend::key_in_prefix;
use vigil_core::types::{normalize_path, KVPair};

/// An immediate child of a prefix, as seen by directory-style listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Child segment name (no slashes).
    pub name: String,
    /// True when the child has its own children (a "subdirectory").
    pub dir: bool,
}

#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<BTreeMap<String, String>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the entire contents — a fetch is all-or-nothing.
    pub fn replace_all(&self, pairs: impl IntoIterator<Item = (String, String)>) {
        let mut map = BTreeMap::new();
        for (key, value) in pairs {
            map.insert(normalize_path(&key), value);
        }
        *self.write() = map;
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Insert one pair, returning the previous value if the key collided.
    pub fn insert(&self, key: &str, value: String) -> Option<String> {
        self.write().insert(normalize_path(key), value)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read().contains_key(&normalize_path(key))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(&normalize_path(key)).cloned()
    }

    /// Single-key fetch with a default for absent keys.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// All pairs under `prefix`, in key order.
    pub fn get_all(&self, prefix: &str) -> Vec<KVPair> {
        let prefix = normalize_path(prefix);
        self.read()
            .iter()
            .filter(|(key, _)| key_in_prefix(key, &prefix))
            .map(|(key, value)| KVPair {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Pattern-glob listing: `*` matches exactly one path segment.
    ///
    /// `/services/*/port` matches `/services/web/port` but neither
    /// `/services/port` nor `/services/web/tls/port`.
    pub fn list(&self, pattern: &str) -> Vec<KVPair> {
        let pattern = normalize_path(pattern);
        let wanted: Vec<&str> = pattern.split('/').skip(1).collect();
        self.read()
            .iter()
            .filter(|(key, _)| segments_match(key, &wanted))
            .map(|(key, value)| KVPair {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Immediate children of `prefix`, deduplicated and sorted, each marked
    /// as a value ("file") or a deeper prefix ("subdirectory").
    pub fn children(&self, prefix: &str) -> Vec<Entry> {
        let prefix = normalize_path(prefix);
        let skip = if prefix == "/" { 1 } else { prefix.split('/').count() };
        let mut out: Vec<Entry> = Vec::new();
        for key in self.read().keys() {
            if !key_in_prefix(key, &prefix) || key == &prefix {
                continue;
            }
            let mut rest = key.split('/').skip(skip);
            let Some(name) = rest.next() else { continue };
            let dir = rest.next().is_some();
            match out.iter_mut().find(|e| e.name == name) {
                // A name can be both a value and a prefix; prefix wins.
                Some(entry) => entry.dir = entry.dir || dir,
                None => out.push(Entry {
                    name: name.to_string(),
                    dir,
                }),
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

fn segments_match(key: &str, pattern: &[&str]) -> bool {
    let segments: Vec<&str> = key.split('/').skip(1).collect();
    segments.len() == pattern.len()
        && segments
            .iter()
            .zip(pattern)
            .all(|(seg, pat)| *pat == "*" || seg == pat)
}
