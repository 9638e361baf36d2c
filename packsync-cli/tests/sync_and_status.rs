use std::fs;
use std::path::PathBuf;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::{json, Value};
use tempfile::TempDir;

struct Fixture {
    home: TempDir,
    project: TempDir,
    desired: PathBuf,
}

impl Fixture {
    fn new(install_command: &str) -> Self {
        let home = TempDir::new().expect("home");
        let project = TempDir::new().expect("project");
        fs::write(
            project.path().join("packsync.yaml"),
            format!("install_command: {install_command}\n"),
        )
        .expect("write project config");
        let desired = project.path().join("desired.json");
        let fixture = Self {
            home,
            project,
            desired,
        };
        fixture.write_desired("1.0");
        fixture
    }

    fn write_desired(&self, version: &str) {
        let mut machines = serde_json::Map::new();
        machines.insert(
            format!("u1:{version}"),
            json!({ "fn": "function(i,e){e.success();}", "name": "u1" }),
        );
        let doc = json!({
            "packA": {
                "machines": machines,
                "dependencies": { "request": "0.2.8" }
            }
        });
        fs::write(&self.desired, serde_json::to_string_pretty(&doc).expect("json"))
            .expect("write desired state");
    }

    fn cache(&self) -> PathBuf {
        self.project.path().join("node_modules/.packsync")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("packsync"));
        cmd.env("HOME", self.home.path())
            .env("XDG_CONFIG_HOME", self.home.path().join(".config"))
            .env_remove("PACKSYNC_URL")
            .env_remove("PACKSYNC_SECRET")
            .env_remove("PACKSYNC_EXPORT")
            .arg("--project-dir")
            .arg(self.project.path())
            .arg("--from-file")
            .arg(&self.desired);
        cmd
    }
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().expect("run packsync");
    assert!(
        output.status.success(),
        "command failed: status={} stderr={}",
        output.status,
        String::from_utf8_lossy(&output.stderr),
    );
    String::from_utf8(output.stdout).expect("utf8 stdout")
}

#[test]
fn sync_writes_pack_and_runs_installer() {
    let fx = Fixture::new(r#"["true"]"#);

    fx.cmd()
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("'packA' synced"))
        .stdout(contains("installing dependencies for 1 pack(s)"));

    let dir = fx.cache().join("packA");
    assert!(dir.join("u1.js").is_file());
    assert!(dir.join("index.js").is_file());
    let manifest: Value =
        serde_json::from_str(&fs::read_to_string(dir.join("package.json")).expect("manifest"))
            .expect("manifest json");
    assert_eq!(manifest["machinepack"]["machineVersions"]["u1"], json!("1.0"));

    // Nothing changed, so nothing is written or installed.
    let stdout = stdout_of(fx.cmd().arg("sync"));
    assert!(stdout.contains("nothing to do"), "{stdout}");
    assert!(!stdout.contains("installing dependencies"), "{stdout}");
}

#[test]
fn dry_run_reports_files_and_writes_nothing() {
    let fx = Fixture::new(r#"["false"]"#);

    let stdout = stdout_of(fx.cmd().args(["sync", "--dry-run"]));
    assert!(stdout.contains("[dry-run]"), "{stdout}");
    assert!(stdout.contains("u1.js"), "{stdout}");
    assert!(!fx.cache().join("packA").exists());
}

#[test]
fn failed_install_is_reported_without_failing_sync() {
    let fx = Fixture::new(r#"["false"]"#);

    fx.cmd()
        .arg("sync")
        .assert()
        .success()
        .stderr(contains("dependency install(s) failed"));
    assert!(fx.cache().join("packA/u1.js").is_file());
}

#[test]
fn status_json_lists_cached_packs() {
    let fx = Fixture::new(r#"["true"]"#);
    fx.cmd().args(["sync", "--skip-install"]).assert().success();

    let stdout = stdout_of(fx.cmd().args(["status", "--json"]));
    let payload: Value = serde_json::from_str(&stdout).expect("status json");
    let packs = payload["packs"].as_array().expect("packs array");
    assert_eq!(packs.len(), 1);
    assert_eq!(packs[0]["name"], json!("packA"));
    assert_eq!(packs[0]["units"], json!(1));
    assert_eq!(packs[0]["dependencies"], json!(1));
    assert!(packs[0]["error"].is_null());
    assert!(packs[0]["synced_at"].is_string());
}

#[test]
fn status_on_empty_cache_suggests_sync() {
    let fx = Fixture::new(r#"["true"]"#);
    fx.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(contains("No packs cached"));
}

#[test]
fn diff_shows_version_bump() {
    let fx = Fixture::new(r#"["true"]"#);
    fx.cmd().args(["sync", "--skip-install"]).assert().success();

    fx.cmd()
        .args(["diff", "packA"])
        .assert()
        .success()
        .stdout(contains("No differences for 'packA'."));

    fx.write_desired("2.0");
    let stdout = stdout_of(fx.cmd().args(["diff", "packA"]));
    assert!(stdout.contains("~ unit u1@2.0 (1.0 -> 2.0)"), "{stdout}");
    assert!(stdout.contains("a/packA/package.json"), "{stdout}");
    assert!(stdout.contains("\"2.0\""), "{stdout}");

    // diff never writes.
    let unit = fs::read_to_string(fx.cache().join("packA/package.json")).expect("manifest");
    assert!(unit.contains("\"1.0\""));
}

#[test]
fn diff_of_unknown_pack_fails() {
    let fx = Fixture::new(r#"["true"]"#);
    fx.cmd()
        .args(["diff", "nope"])
        .assert()
        .failure()
        .stderr(contains("nope"));
}

#[test]
fn export_writes_into_current_directory() {
    let fx = Fixture::new(r#"["true"]"#);
    let workdir = TempDir::new().expect("workdir");

    fx.cmd()
        .current_dir(workdir.path())
        .args(["export", "packA", "--skip-install"])
        .assert()
        .success();

    assert!(workdir.path().join("packA/u1.js").is_file());
    assert!(workdir.path().join("packA/package.json").is_file());
    assert!(!fx.cache().exists());
}

#[test]
fn daemon_status_without_daemon_reports_not_running() {
    let fx = Fixture::new(r#"["true"]"#);
    let stdout = stdout_of(fx.cmd().args(["daemon", "status"]));
    let payload: Value = serde_json::from_str(&stdout).expect("status json");
    assert_eq!(payload["running"], json!(false));
}

#[test]
fn full_sync_in_export_mode_leaves_the_directory_alone() {
    let fx = Fixture::new(r#"["true"]"#);
    let workdir = TempDir::new().expect("workdir");
    fs::create_dir_all(workdir.path().join("src")).expect("src dir");
    fs::create_dir_all(workdir.path().join(".git")).expect("git dir");

    fx.cmd()
        .current_dir(workdir.path())
        .env("PACKSYNC_EXPORT", "1")
        .args(["sync", "--skip-install"])
        .assert()
        .failure()
        .stderr(contains("export directory"));

    assert!(workdir.path().join("src").is_dir());
    assert!(workdir.path().join(".git").is_dir());
    assert!(!workdir.path().join("packA").exists());
}
