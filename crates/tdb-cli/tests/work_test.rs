use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tdb(db_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("tdb").unwrap();
    cmd.env("TEMPLEDB_PATH", db_dir.join("templedb.sqlite"));
    cmd
}

#[test]
fn create_and_dispatch_work_item() {
    let home = TempDir::new().unwrap();

    tdb(home.path())
        .args(["project", "create", "acme", "--name", "Acme"])
        .assert()
        .success();

    tdb(home.path())
        .args(["work", "create", "acme", "fix the thing", "--priority", "high"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created"));

    tdb(home.path())
        .args(["work", "list", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fix the thing"));

    tdb(home.path())
        .args(["work", "dispatch", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dispatched 0"));
}
