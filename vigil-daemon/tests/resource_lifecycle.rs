//! End-to-end resource monitor behavior against in-memory backends.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use vigil_core::backend::{Backend, BackendBlock, BackendKind};
use vigil_core::backends::statik::StaticBackend;
use vigil_core::types::{BackendSettings, ExecSpec, ResourceSpec, TemplateSpec};
use vigil_daemon::Resource;

fn watch_settings(name: &str) -> BackendSettings {
    let mut settings = BackendSettings {
        name: name.to_string(),
        prefix: String::new(),
        keys: vec!["/".to_string()],
        watch_keys: vec![],
        watch: true,
        interval: 0,
        onetime: false,
    };
    settings.normalize();
    settings
}

fn static_block(settings: BackendSettings) -> BackendBlock {
    BackendBlock {
        settings,
        kind: BackendKind::Static {
            values: BTreeMap::new(),
        },
    }
}

fn template(dir: &TempDir, body: &str) -> TemplateSpec {
    let src = dir.path().join("out.tmpl");
    std::fs::write(&src, body).expect("write template source");
    TemplateSpec {
        src,
        dst: dir.path().join("out.conf"),
        mode: String::new(),
        uid: None,
        gid: None,
        check_cmd: None,
        reload_cmd: None,
        mkdirs: false,
    }
}

async fn wait_for_content(path: &Path, want: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(body) = std::fs::read_to_string(path) {
            if body == want {
                return;
            }
        }
        if Instant::now() >= deadline {
            let got = std::fs::read_to_string(path).unwrap_or_else(|_| "<missing>".to_string());
            panic!("timed out waiting for {path:?} to become {want:?}, got {got:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn converges_then_tracks_backend_changes() {
    let dir = TempDir::new().expect("tempdir");
    let backend = StaticBackend::new();
    backend.set("/greeting", "1");

    let tmpl = template(&dir, "{{ getv(key=\"/greeting\") }}");
    let dst = tmpl.dst.clone();
    let spec = ResourceSpec {
        name: "web".into(),
        backends: vec![static_block(watch_settings("static"))],
        templates: vec![tmpl],
        exec: None,
        start_cmd: None,
        reload_cmd: None,
    };
    let resource = Arc::new(Resource::with_handles(
        spec,
        vec![Arc::new(backend.clone()) as Arc<dyn Backend>],
    ));

    let cancel = CancellationToken::new();
    let handle = {
        let resource = Arc::clone(&resource);
        let cancel = cancel.clone();
        tokio::spawn(async move { resource.monitor(cancel).await })
    };

    wait_for_content(&dst, "1").await;
    let mode = std::fs::metadata(&dst)
        .expect("dst metadata")
        .permissions()
        .mode()
        & 0o7777;
    assert_eq!(mode, 0o644, "fresh destination takes the 0644 fallback");

    backend.set("/greeting", "2");
    wait_for_content(&dst, "2").await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor winds down after cancel")
        .expect("join");
    assert!(!resource.failed(), "clean cancellation is not a failure");
}

#[tokio::test]
async fn change_cycle_runs_reload_hook_once() {
    let dir = TempDir::new().expect("tempdir");
    let marker = dir.path().join("reloads");
    let backend = StaticBackend::new();
    backend.set("/port", "8000");

    let tmpl = template(&dir, "port={{ getv(key=\"/port\") }}\n");
    let dst = tmpl.dst.clone();
    let spec = ResourceSpec {
        name: "svc".into(),
        backends: vec![static_block(watch_settings("static"))],
        templates: vec![tmpl],
        exec: None,
        start_cmd: None,
        reload_cmd: Some(format!("printf x >> {}", marker.display())),
    };
    let resource = Arc::new(Resource::with_handles(
        spec,
        vec![Arc::new(backend.clone()) as Arc<dyn Backend>],
    ));

    let cancel = CancellationToken::new();
    let handle = {
        let resource = Arc::clone(&resource);
        let cancel = cancel.clone();
        tokio::spawn(async move { resource.monitor(cancel).await })
    };

    wait_for_content(&dst, "port=8000\n").await;
    assert!(
        !marker.exists(),
        "initial convergence does not count as a reload"
    );

    backend.set("/port", "9000");
    wait_for_content(&dst, "port=9000\n").await;

    // Give any spurious second reload a chance to land before counting.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let marks = std::fs::read_to_string(&marker).expect("reload marker written");
    assert_eq!(marks, "x", "exactly one reload for one change");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn later_backend_wins_collisions() {
    let dir = TempDir::new().expect("tempdir");
    let first = StaticBackend::new();
    first.set("/x", "from-first");
    let second = StaticBackend::new();
    second.set("/x", "from-second");

    let tmpl = template(&dir, "{{ getv(key=\"/x\") }}");
    let dst = tmpl.dst.clone();
    let spec = ResourceSpec {
        name: "merge".into(),
        backends: vec![
            static_block(watch_settings("first")),
            static_block(watch_settings("second")),
        ],
        templates: vec![tmpl],
        exec: None,
        start_cmd: None,
        reload_cmd: None,
    };
    let resource = Arc::new(Resource::with_handles(
        spec,
        vec![
            Arc::new(first.clone()) as Arc<dyn Backend>,
            Arc::new(second.clone()) as Arc<dyn Backend>,
        ],
    ));

    let cancel = CancellationToken::new();
    let handle = {
        let resource = Arc::clone(&resource);
        let cancel = cancel.clone();
        tokio::spawn(async move { resource.monitor(cancel).await })
    };

    wait_for_content(&dst, "from-second").await;

    // Updating the earlier backend must not shadow the later one.
    first.set("/x", "first-again");
    first.set("/marker", "seen");
    tokio::time::sleep(Duration::from_millis(300)).await;
    let body = std::fs::read_to_string(&dst).expect("dst");
    assert_eq!(body, "from-second");

    // Dropping the later backend's key uncovers the earlier value.
    second.remove("/x");
    wait_for_content(&dst, "first-again").await;

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn watch_incapable_backend_does_not_end_the_resource() {
    let dir = TempDir::new().expect("tempdir");
    let backend = vigil_core::backends::env::EnvBackend::new();

    let spec = ResourceSpec {
        name: "envwatch".into(),
        backends: vec![BackendBlock {
            settings: watch_settings("env"),
            kind: BackendKind::Env {},
        }],
        templates: vec![template(&dir, "{{ exists(key=\"/nope\") }}")],
        exec: None,
        start_cmd: None,
        reload_cmd: None,
    };
    let resource = Arc::new(Resource::with_handles(
        spec,
        vec![Arc::new(backend) as Arc<dyn Backend>],
    ));

    let cancel = CancellationToken::new();
    let handle = {
        let resource = Arc::clone(&resource);
        let cancel = cancel.clone();
        tokio::spawn(async move { resource.monitor(cancel).await })
    };

    // A non-onetime resource must keep polling even though the backend
    // cannot watch; the monitor only returns when told to.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!handle.is_finished(), "monitor still running");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor winds down after cancel")
        .expect("join");
    assert!(!resource.failed());
}

#[tokio::test]
async fn onetime_resource_completes_naturally() {
    let dir = TempDir::new().expect("tempdir");
    let backend = StaticBackend::new();
    backend.set("/a", "done");

    let mut settings = watch_settings("static");
    settings.watch = false;
    settings.onetime = true;

    let tmpl = template(&dir, "{{ getv(key=\"/a\") }}");
    let dst = tmpl.dst.clone();
    let spec = ResourceSpec {
        name: "once".into(),
        backends: vec![static_block(settings)],
        templates: vec![tmpl],
        exec: None,
        start_cmd: None,
        reload_cmd: None,
    };
    let resource = Arc::new(Resource::with_handles(
        spec,
        vec![Arc::new(backend) as Arc<dyn Backend>],
    ));

    let cancel = CancellationToken::new();
    tokio::time::timeout(Duration::from_secs(5), resource.monitor(cancel))
        .await
        .expect("render-once resource finishes on its own");
    assert_eq!(std::fs::read_to_string(&dst).expect("dst"), "done");
    assert!(!resource.failed());
}

#[tokio::test]
async fn failed_start_command_marks_resource_failed() {
    let dir = TempDir::new().expect("tempdir");
    let backend = StaticBackend::new();
    backend.set("/a", "1");

    let spec = ResourceSpec {
        name: "badstart".into(),
        backends: vec![static_block(watch_settings("static"))],
        templates: vec![template(&dir, "{{ getv(key=\"/a\") }}")],
        exec: None,
        start_cmd: Some("exit 7".to_string()),
        reload_cmd: None,
    };
    let resource = Arc::new(Resource::with_handles(
        spec,
        vec![Arc::new(backend) as Arc<dyn Backend>],
    ));

    let cancel = CancellationToken::new();
    tokio::time::timeout(Duration::from_secs(5), resource.monitor(cancel))
        .await
        .expect("monitor returns after the start hook fails");
    assert!(resource.failed());
}

#[tokio::test]
async fn unexpected_process_exit_marks_resource_failed() {
    let dir = TempDir::new().expect("tempdir");
    let backend = StaticBackend::new();
    backend.set("/a", "1");

    let spec = ResourceSpec {
        name: "crashy".into(),
        backends: vec![static_block(watch_settings("static"))],
        templates: vec![template(&dir, "{{ getv(key=\"/a\") }}")],
        exec: Some(ExecSpec {
            command: "sh -c 'exit 1'".to_string(),
            ..ExecSpec::default()
        }),
        start_cmd: None,
        reload_cmd: None,
    };
    let resource = Arc::new(Resource::with_handles(
        spec,
        vec![Arc::new(backend) as Arc<dyn Backend>],
    ));

    let cancel = CancellationToken::new();
    tokio::time::timeout(Duration::from_secs(10), resource.monitor(cancel))
        .await
        .expect("monitor notices the exit and returns");
    assert!(resource.failed());
}
