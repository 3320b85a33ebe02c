//! File backend — a TOML document flattened into keys.
//!
//! Tables become path segments, scalar array elements become numbered
//! children (`/list/0`, `/list/1`, ...). Watching uses `notify` on the
//! file's parent directory so editor rename-into-place saves are seen.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{key_in_prefix, Backend};
use crate::error::{backend_io_err, BackendError};

#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Result<HashMap<String, String>, BackendError> {
        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| backend_io_err(&self.path, e))?;
        let value: toml::Value =
            toml::from_str(&contents).map_err(|source| BackendError::Parse {
                path: self.path.clone(),
                source,
            })?;
        let mut out = HashMap::new();
        flatten("", &value, &mut out);
        Ok(out)
    }
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut HashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (name, child) in table {
                flatten(&format!("{prefix}/{name}"), child, out);
            }
        }
        toml::Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten(&format!("{prefix}/{idx}"), child, out);
            }
        }
        scalar => {
            if let Some(rendered) = scalar_to_string(scalar) {
                let key = if prefix.is_empty() { "/" } else { prefix };
                out.insert(key.to_string(), rendered);
            }
        }
    }
}

fn touches_path(event: &Event, path: &Path) -> bool {
    let target = path.file_name();
    event
        .paths
        .iter()
        .any(|p| p == path || (target.is_some() && p.file_name() == target))
}

#[async_trait]
impl Backend for FileBackend {
    async fn fetch_values(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, String>, BackendError> {
        let mut all = self.load()?;
        all.retain(|key, _| keys.iter().any(|prefix| key_in_prefix(key, prefix)));
        Ok(all)
    }

    async fn watch_prefix(
        &self,
        _prefix: &str,
        _keys: &[String],
        token: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, BackendError> {
        let watch_dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BackendError::Canceled),
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        return Err(BackendError::Canceled);
                    };
                    let event = event?;
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    );
                    if relevant && touches_path(&event, &self.path) {
                        return Ok(token + 1);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_doc(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("data.toml");
        std::fs::write(&path, body).expect("write data file");
        path
    }

    #[tokio::test]
    async fn fetch_flattens_tables_and_arrays() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_doc(
            &dir,
            r#"
            [web]
            host = "10.0.0.1"
            port = 8080
            upstreams = ["a", "b"]
            "#,
        );

        let backend = FileBackend::new(path);
        let values = backend
            .fetch_values(&["/web".to_string()])
            .await
            .expect("fetch");
        assert_eq!(values.get("/web/host").map(String::as_str), Some("10.0.0.1"));
        assert_eq!(values.get("/web/port").map(String::as_str), Some("8080"));
        assert_eq!(values.get("/web/upstreams/0").map(String::as_str), Some("a"));
        assert_eq!(values.get("/web/upstreams/1").map(String::as_str), Some("b"));
    }

    #[tokio::test]
    async fn fetch_scopes_to_requested_prefixes() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_doc(
            &dir,
            r#"
            [web]
            host = "h"
            [db]
            host = "d"
            "#,
        );

        let backend = FileBackend::new(path);
        let values = backend
            .fetch_values(&["/db".to_string()])
            .await
            .expect("fetch");
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("/db/host").map(String::as_str), Some("d"));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = TempDir::new().expect("tempdir");
        let backend = FileBackend::new(dir.path().join("absent.toml"));
        let err = backend
            .fetch_values(&["/".to_string()])
            .await
            .expect_err("missing file must fail");
        assert!(matches!(err, BackendError::Io { .. }));
    }

    #[tokio::test]
    async fn watch_returns_new_token_on_modify() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_doc(&dir, "a = \"1\"\n");
        let backend = FileBackend::new(path.clone());
        let cancel = CancellationToken::new();

        let watch = tokio::spawn(async move {
            backend
                .watch_prefix("/", &["/".to_string()], 7, &cancel)
                .await
        });

        // Give the watcher a moment to register before mutating the file.
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&path, "a = \"2\"\n").expect("rewrite data file");

        let token = tokio::time::timeout(Duration::from_secs(5), watch)
            .await
            .expect("watch should observe the write")
            .expect("join")
            .expect("watch result");
        assert_eq!(token, 8);
    }

    #[tokio::test]
    async fn watch_observes_cancellation() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_doc(&dir, "a = \"1\"\n");
        let backend = FileBackend::new(path);
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let watch = tokio::spawn(async move {
            backend
                .watch_prefix("/", &["/".to_string()], 0, &child)
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(2), watch)
            .await
            .expect("watch should exit promptly on cancel")
            .expect("join")
            .expect_err("canceled watch returns the sentinel");
        assert!(matches!(err, BackendError::Canceled));
    }
}
