//! Domain types for vigil configuration.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem
//! paths. Everything here is the *parsed* shape the reconciliation engine
//! consumes — TOML loading lives in [`crate::config`].

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a resource (the unit of reconciliation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceName(pub String);

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ResourceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Key-value pair
// ---------------------------------------------------------------------------

/// One key-value pair as seen by templates: key absolute and slash-rooted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KVPair {
    pub key: String,
    pub value: String,
}

/// Normalize a key path: force a leading `/`, collapse repeated slashes,
/// strip any trailing slash (the root itself stays `/`).
pub fn normalize_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);
    out.push('/');
    for segment in raw.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// Parse an octal mode string like `"0644"` or `"644"`.
pub fn parse_octal_mode(raw: &str) -> Option<u32> {
    let digits = raw.trim();
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 8).ok()
}

// ---------------------------------------------------------------------------
// Backend settings
// ---------------------------------------------------------------------------

/// Default interval forced onto a backend that would otherwise never make
/// forward progress (no watch, no interval, not onetime).
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Scheduling and key-scope settings shared by every backend kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Name used in logs; defaults to the backend kind.
    #[serde(default)]
    pub name: String,

    /// Prefix prepended to every key before fetching, stripped again when
    /// the results are re-rooted into the merge store.
    #[serde(default)]
    pub prefix: String,

    /// Key prefixes to fetch.
    #[serde(default)]
    pub keys: Vec<String>,

    /// Key prefixes that trigger a re-fetch when watched; defaults to `keys`.
    #[serde(default)]
    pub watch_keys: Vec<String>,

    /// Run a blocking watch loop for this backend.
    #[serde(default)]
    pub watch: bool,

    /// Poll interval in seconds; 0 disables the timer loop.
    #[serde(default)]
    pub interval: u64,

    /// Fetch exactly once and never re-trigger.
    #[serde(default)]
    pub onetime: bool,
}

impl BackendSettings {
    /// Apply defaulting invariants: normalized keys, `watch_keys` falling
    /// back to `keys`, and interval coercion so the backend always makes
    /// some forward progress.
    pub fn normalize(&mut self) {
        self.prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            normalize_path(&self.prefix)
        };
        if self.prefix == "/" {
            self.prefix.clear();
        }
        if self.keys.is_empty() {
            self.keys.push("/".to_string());
        }
        for key in &mut self.keys {
            *key = normalize_path(key);
        }
        if self.watch_keys.is_empty() {
            self.watch_keys = self.keys.clone();
        } else {
            for key in &mut self.watch_keys {
                *key = normalize_path(key);
            }
        }
        if !self.watch && self.interval == 0 && !self.onetime {
            self.interval = DEFAULT_INTERVAL_SECS;
        }
    }
}

// ---------------------------------------------------------------------------
// Template spec
// ---------------------------------------------------------------------------

/// One template source/destination pair with its install policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Template source path.
    pub src: PathBuf,

    /// Destination file path.
    pub dst: PathBuf,

    /// Octal mode string, e.g. `"0644"`. Empty means "inherit the
    /// destination's current mode, or 0644 if the destination is absent".
    #[serde(default)]
    pub mode: String,

    /// Owner uid applied to the installed file; `None` keeps the process uid.
    #[serde(default)]
    pub uid: Option<u32>,

    /// Owner gid applied to the installed file; `None` keeps the process gid.
    #[serde(default)]
    pub gid: Option<u32>,

    /// Command run against the staged file before install; `{}` is replaced
    /// with the staged path. Non-zero exit aborts the sync.
    #[serde(default)]
    pub check_cmd: Option<String>,

    /// Command run after the destination actually changed.
    #[serde(default)]
    pub reload_cmd: Option<String>,

    /// Create missing destination directories instead of failing.
    #[serde(default)]
    pub mkdirs: bool,
}

// ---------------------------------------------------------------------------
// Exec spec
// ---------------------------------------------------------------------------

fn default_kill_signal() -> String {
    "SIGTERM".to_string()
}

fn default_kill_timeout() -> u64 {
    10
}

/// Managed child process settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSpec {
    /// Shell-style command line. Empty means "render only, no process".
    #[serde(default)]
    pub command: String,

    /// Signal delivered on reload; absent means kill-and-respawn.
    #[serde(default)]
    pub reload_signal: Option<String>,

    /// Signal delivered on stop before the kill timeout escalates.
    #[serde(default = "default_kill_signal")]
    pub kill_signal: String,

    /// Seconds to wait after `kill_signal` before force-killing.
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: u64,

    /// Random start delay bound in seconds (0 disables the splay).
    #[serde(default)]
    pub splay: u64,
}

impl Default for ExecSpec {
    fn default() -> Self {
        Self {
            command: String::new(),
            reload_signal: None,
            kill_signal: default_kill_signal(),
            kill_timeout: default_kill_timeout(),
            splay: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Resource spec
// ---------------------------------------------------------------------------

/// One resource: ordered backends + ordered templates + optional process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: ResourceName,

    /// Backends in declaration order; later backends win key collisions.
    #[serde(default, rename = "backend")]
    pub backends: Vec<crate::backend::BackendBlock>,

    /// Templates in declaration order.
    #[serde(default, rename = "template")]
    pub templates: Vec<TemplateSpec>,

    /// Managed child process; `None` or an empty command means render-only.
    #[serde(default)]
    pub exec: Option<ExecSpec>,

    /// Command run once after initial convergence, before the process spawns.
    #[serde(default)]
    pub start_cmd: Option<String>,

    /// Command run after any incremental cycle that changed a destination.
    #[serde(default)]
    pub reload_cmd: Option<String>,
}

/// Whole-process configuration: every resource plus daemon-level knobs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceSpec>,

    /// PID file written by the supervisor, rewritten across reloads.
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_roots_and_collapses() {
        assert_eq!(normalize_path("a/b"), "/a/b");
        assert_eq!(normalize_path("/a//b/"), "/a/b");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn settings_normalize_defaults_watch_keys_to_keys() {
        let mut s = BackendSettings {
            name: String::new(),
            prefix: "svc/".into(),
            keys: vec!["web".into()],
            watch_keys: vec![],
            watch: true,
            interval: 0,
            onetime: false,
        };
        s.normalize();
        assert_eq!(s.prefix, "/svc");
        assert_eq!(s.keys, vec!["/web".to_string()]);
        assert_eq!(s.watch_keys, s.keys);
        // Watch is enabled, so no interval coercion.
        assert_eq!(s.interval, 0);
    }

    #[test]
    fn settings_without_progress_get_default_interval() {
        let mut s = BackendSettings {
            name: String::new(),
            prefix: String::new(),
            keys: vec!["/".into()],
            watch_keys: vec![],
            watch: false,
            interval: 0,
            onetime: false,
        };
        s.normalize();
        assert_eq!(s.interval, DEFAULT_INTERVAL_SECS);
    }

    #[test]
    fn onetime_settings_keep_zero_interval() {
        let mut s = BackendSettings {
            name: String::new(),
            prefix: String::new(),
            keys: vec![],
            watch_keys: vec![],
            watch: false,
            interval: 0,
            onetime: true,
        };
        s.normalize();
        assert_eq!(s.interval, 0);
        assert_eq!(s.keys, vec!["/".to_string()]);
    }
}
