//! Stage-and-sync pipeline for one template destination.
//!
//! ## One render cycle
//!
//! 1. Render the source template against the merge store.
//! 2. Stage into a temp file in the *destination's* directory (same
//!    filesystem, so the final rename is atomic) and apply mode/owner
//!    immediately so the comparison is apples-to-apples.
//! 3. Compare uid, gid, mode, and SHA-256 content digest against the
//!    destination; identical means `changed = false` and nothing else runs.
//! 4. Run the check command (`{}` replaced with the staged path); non-zero
//!    exit discards the staged file and leaves the destination untouched.
//! 5. Rename into place; EBUSY/EXDEV (bind-mount destinations) fall back to
//!    a plain write with ownership re-applied.
//! 6. Run the reload command only when the file actually changed.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::unistd::{Gid, Uid};
use sha2::{Digest, Sha256};
use tempfile::{Builder, NamedTempFile};

use vigil_core::types::{parse_octal_mode, TemplateSpec};
use vigil_store::Store;

use crate::error::{io_err, RenderError};
use crate::template::render_source;

/// Outcome of one render cycle for one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    /// True when the destination file was actually replaced.
    pub changed: bool,
}

/// Owner, mode, and content identity of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileState {
    uid: u32,
    gid: u32,
    mode: u32,
    digest: String,
}

fn file_state(path: &Path) -> Result<FileState, RenderError> {
    let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    Ok(FileState {
        uid: meta.uid(),
        gid: meta.gid(),
        mode: meta.mode() & 0o7777,
        digest: hex::encode(Sha256::digest(&bytes)),
    })
}

/// Stateless renderer for one template spec; holds only the merged store.
pub struct Renderer {
    spec: TemplateSpec,
    store: Arc<Store>,
}

impl Renderer {
    pub fn new(spec: TemplateSpec, store: Arc<Store>) -> Self {
        Self { spec, store }
    }

    pub fn spec(&self) -> &TemplateSpec {
        &self.spec
    }

    /// Run one full stage/compare/check/install/reload cycle.
    pub async fn sync(&self) -> Result<SyncOutcome, RenderError> {
        let src = &self.spec.src;
        if !src.exists() {
            return Err(RenderError::MissingTemplate { path: src.clone() });
        }
        let source = std::fs::read_to_string(src).map_err(|e| io_err(src, e))?;
        let rendered = render_source(&source, &self.store)?;

        let dst_dir = self.destination_dir()?;
        let staged = self.stage(&rendered, &dst_dir)?;

        if self.in_sync(staged.path())? {
            tracing::debug!(dst = %self.spec.dst.display(), "destination in sync");
            return Ok(SyncOutcome { changed: false });
        }

        if let Some(cmd) = &self.spec.check_cmd {
            self.run_check(cmd, staged.path()).await?;
        }

        self.install(staged, rendered.as_bytes())?;
        tracing::info!(dst = %self.spec.dst.display(), "synced destination");

        if let Some(cmd) = &self.spec.reload_cmd {
            run_reload(cmd).await?;
        }

        Ok(SyncOutcome { changed: true })
    }

    fn destination_dir(&self) -> Result<PathBuf, RenderError> {
        let dir = self
            .spec
            .dst
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if !dir.exists() {
            if !self.spec.mkdirs {
                return Err(RenderError::DstDirMissing { path: dir });
            }
            std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
        Ok(dir)
    }

    /// Write the rendered bytes into a temp file next to the destination
    /// and apply the target mode/owner immediately.
    fn stage(&self, rendered: &str, dst_dir: &Path) -> Result<NamedTempFile, RenderError> {
        let staged = Builder::new()
            .prefix(".vigil-")
            .suffix(".tmp")
            .tempfile_in(dst_dir)
            .map_err(|e| io_err(dst_dir, e))?;
        std::fs::write(staged.path(), rendered).map_err(|e| io_err(staged.path(), e))?;
        self.apply_mode_and_owner(staged.path())?;
        Ok(staged)
    }

    fn apply_mode_and_owner(&self, path: &Path) -> Result<(), RenderError> {
        let mode = self.effective_mode();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| io_err(path, e))?;
        if self.spec.uid.is_some() || self.spec.gid.is_some() {
            nix::unistd::chown(
                path,
                self.spec.uid.map(Uid::from_raw),
                self.spec.gid.map(Gid::from_raw),
            )
            .map_err(|source| RenderError::Chown {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Empty mode string: inherit the destination's current mode, or 0644
    /// when the destination does not exist yet.
    fn effective_mode(&self) -> u32 {
        if self.spec.mode.is_empty() {
            match std::fs::metadata(&self.spec.dst) {
                Ok(meta) => meta.mode() & 0o7777,
                Err(_) => 0o644,
            }
        } else {
            parse_octal_mode(&self.spec.mode).unwrap_or(0o644)
        }
    }

    fn in_sync(&self, staged: &Path) -> Result<bool, RenderError> {
        if !self.spec.dst.exists() {
            return Ok(false);
        }
        Ok(file_state(staged)? == file_state(&self.spec.dst)?)
    }

    async fn run_check(&self, cmd: &str, staged: &Path) -> Result<(), RenderError> {
        let cmd = cmd.replace("{}", &staged.display().to_string());
        let output = sh(&cmd).await.map_err(|e| io_err(staged, e))?;
        if !output.status.success() {
            let status = output.status.code().unwrap_or(-1);
            tracing::error!(
                cmd = %cmd,
                status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "check command rejected staged file",
            );
            return Err(RenderError::CheckFailed { cmd, status });
        }
        Ok(())
    }

    /// Atomic rename, with a copy-bytes fallback for destinations that
    /// cannot be renamed over (bind mounts and cross-device moves).
    fn install(&self, staged: NamedTempFile, rendered: &[u8]) -> Result<(), RenderError> {
        let dst = &self.spec.dst;
        match staged.persist(dst) {
            Ok(_) => Ok(()),
            Err(persist_err) => {
                let busy = matches!(
                    persist_err.error.raw_os_error(),
                    Some(code) if code == nix::errno::Errno::EBUSY as i32
                        || code == nix::errno::Errno::EXDEV as i32
                );
                if !busy {
                    return Err(io_err(dst, persist_err.error));
                }
                tracing::debug!(
                    dst = %dst.display(),
                    "rename refused, falling back to direct write",
                );
                std::fs::write(dst, rendered).map_err(|e| io_err(dst, e))?;
                // A plain write does not carry the staged file's mode or
                // ownership along; re-apply both.
                self.apply_mode_and_owner(dst)?;
                Ok(())
            }
        }
    }
}

async fn sh(cmd: &str) -> std::io::Result<std::process::Output> {
    tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .await
}

async fn run_reload(cmd: &str) -> Result<(), RenderError> {
    let output = sh(cmd)
        .await
        .map_err(|e| io_err(PathBuf::from("sh"), e))?;
    if !output.status.success() {
        let status = output.status.code().unwrap_or(-1);
        tracing::error!(
            cmd = %cmd,
            status,
            stderr = %String::from_utf8_lossy(&output.stderr),
            "reload command failed",
        );
        return Err(RenderError::ReloadFailed {
            cmd: cmd.to_string(),
            status,
        });
    }
    Ok(())
}
