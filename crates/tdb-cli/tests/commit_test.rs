use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tdb(db_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("tdb").unwrap();
    cmd.env("TEMPLEDB_PATH", db_dir.join("templedb.sqlite"));
    cmd
}

#[test]
fn add_commit_log_round_trip() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    tdb(home.path()).arg("init").arg(work.path()).assert().success();

    std::fs::write(work.path().join("lib.rs"), "pub fn a() {}\n").unwrap();

    tdb(home.path())
        .current_dir(work.path())
        .args(["add", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("staged 1"));

    tdb(home.path())
        .current_dir(work.path())
        .args(["commit", "-m", "add lib.rs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("committed"));

    tdb(home.path())
        .current_dir(work.path())
        .args(["log", "--oneline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("add lib.rs"));
}

#[test]
fn commit_without_staged_changes_fails() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    tdb(home.path()).arg("init").arg(work.path()).assert().success();

    tdb(home.path())
        .current_dir(work.path())
        .args(["commit", "-m", "nothing staged"])
        .assert()
        .failure();
}
