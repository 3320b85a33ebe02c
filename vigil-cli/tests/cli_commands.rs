use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn vigil_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("vigil"))
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("vigil.toml");
    std::fs::write(&path, body).expect("write config");
    path
}

fn sample_config(dir: &TempDir) -> std::path::PathBuf {
    let tmpl = dir.path().join("app.tmpl");
    std::fs::write(&tmpl, "server={{ getv(key=\"/server/host\") }}\n").expect("write template");
    let dst = dir.path().join("app.conf");
    write_config(
        dir,
        &format!(
            r#"
[[resource]]
name = "app"

[[resource.backend]]
kind = "static"
[resource.backend.values]
"/server/host" = "db1"

[[resource.template]]
src = "{}"
dst = "{}"
mode = "0600"
"#,
            tmpl.display(),
            dst.display(),
        ),
    )
}

#[test]
fn check_accepts_valid_config() {
    let dir = TempDir::new().expect("tempdir");
    let config = sample_config(&dir);

    vigil_cmd()
        .args(["check", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("app: 1 backend(s), 1 template(s)"));
}

#[test]
fn check_rejects_duplicate_resource_names() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(
        &dir,
        r#"
[[resource]]
name = "twin"

[[resource]]
name = "twin"
"#,
    );

    vigil_cmd()
        .args(["check", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("twin"));
}

#[test]
fn check_rejects_unparseable_toml() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(&dir, "[[resource]\nname = ");

    vigil_cmd()
        .args(["check", "--config"])
        .arg(&config)
        .assert()
        .failure();
}

#[test]
fn onetime_run_renders_and_exits() {
    let dir = TempDir::new().expect("tempdir");
    let config = sample_config(&dir);
    let dst = dir.path().join("app.conf");

    vigil_cmd()
        .args(["run", "--onetime", "--config"])
        .arg(&config)
        .assert()
        .success();

    let body = std::fs::read_to_string(&dst).expect("destination rendered");
    assert_eq!(body, "server=db1\n");

    let mode = mode_of(&dst);
    assert_eq!(mode, 0o600, "configured mode applied");
}

#[test]
fn onetime_run_removes_pid_file() {
    let dir = TempDir::new().expect("tempdir");
    let config = sample_config(&dir);
    let pid_path = dir.path().join("vigil.pid");

    vigil_cmd()
        .args(["run", "--onetime", "--config"])
        .arg(&config)
        .arg("--pid-file")
        .arg(&pid_path)
        .assert()
        .success();

    assert!(!pid_path.exists(), "pid file cleaned up after completion");
}

fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .expect("metadata")
        .permissions()
        .mode()
        & 0o7777
}
