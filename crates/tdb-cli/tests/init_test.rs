use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tdb(db_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("tdb").unwrap();
    cmd.env("TEMPLEDB_PATH", db_dir.join("templedb.sqlite"));
    cmd
}

#[test]
fn init_creates_workspace_marker() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    tdb(home.path())
        .arg("init")
        .arg(work.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("initialized"));

    assert!(work.path().join(".templedb").join("workspace.toml").exists());
}

#[test]
fn status_reports_clean_tree_immediately_after_init() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    tdb(home.path()).arg("init").arg(work.path()).assert().success();

    tdb(home.path())
        .current_dir(work.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to commit"));
}
