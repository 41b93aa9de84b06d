//! `cfs` binary: output contract and exit codes.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const CSV: &str = "purchase_timestamp,customer_id,purchase_value,loyalty_score\n\
2024-01-01 10:00:00,1001,100.0,0.5\n\
2024-01-02 11:00:00,1002,200.0,0.25\n\
2024-01-03 12:00:00,1001,150.0,0.75\n";

fn project() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("feature_repo").join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("test_task_data.csv"), CSV).unwrap();
    let config = dir.path().join("config.yaml");
    fs::write(
        &config,
        "data:\n  test_task_data: \"{project_root}/feature_repo/data/test_task_data.csv\"\n  \
         feature_repo_path: \"{project_root}/feature_repo\"\n\
         redis:\n  host: 127.0.0.1\n  port: 1\n  connect_timeout_ms: 200\n\
         feature_store:\n  timezone: UTC\n",
    )
    .unwrap();
    (dir, config)
}

fn cfs(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cfs").unwrap();
    cmd.arg("--config")
        .arg(config)
        .arg("-q")
        .env_remove("RUST_LOG")
        .env_remove("CFS_LOG")
        .env_remove("CFS_PROJECT_ROOT");
    cmd
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("cfs")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("materialize-incremental"))
        .stdout(predicate::str::contains("get-historical-features"))
        .stdout(predicate::str::contains("clear-online-store"));
}

#[test]
fn full_pipeline() {
    let (dir, config) = project();

    cfs(&config)
        .arg("convert")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rows: 3"))
        .stdout(predicate::str::contains("✅"));
    assert!(dir
        .path()
        .join("feature_repo/data/test_task_data.parquet")
        .is_file());

    cfs(&config)
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 created"));
    cfs(&config)
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 created, 0 updated, 3 unchanged"));

    cfs(&config)
        .arg("materialize")
        .assert()
        .success()
        .stdout(predicate::str::contains("customer_features"))
        .stdout(predicate::str::contains("✅ Materialization complete"));

    cfs(&config)
        .args(["get-features", "-c", "1001", "9999"])
        .assert()
        .success()
        .stdout(predicate::str::contains("150"))
        .stdout(predicate::str::contains("9999"))
        .stdout(predicate::str::contains("Retrieved 2 rows"));

    cfs(&config)
        .args(["get-historical-features", "-s", "2024-01-02"])
        .assert()
        .success()
        .stdout(predicate::str::contains("event_timestamp"))
        .stdout(predicate::str::contains("Retrieved 2 rows"));

    cfs(&config)
        .arg("feature-views")
        .assert()
        .success()
        .stdout(predicate::str::contains("customer_features"))
        .stdout(predicate::str::contains("loyalty_score:float32"));

    cfs(&config)
        .args(["materialize-incremental", "-e", "2024-01-10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("written"));
}

#[test]
fn maintenance_without_redis_still_succeeds() {
    let (_dir, config) = project();
    cfs(&config)
        .arg("backup-online-store")
        .assert()
        .success()
        .stdout(predicate::str::contains("Redis unavailable"));
    cfs(&config)
        .arg("clear-online-store")
        .assert()
        .success()
        .stdout(predicate::str::contains("Redis unavailable"));
}

#[test]
fn bad_customer_id_exits_with_schema_code() {
    let (_dir, config) = project();
    cfs(&config).arg("convert").assert().success();
    cfs(&config).arg("apply").assert().success();
    cfs(&config)
        .args(["get-features", "-c", "abc"])
        .assert()
        .code(13)
        .stderr(predicate::str::contains("✗"));
}

#[test]
fn missing_source_exits_not_found() {
    let (_dir, config) = project();
    cfs(&config).arg("apply").assert().success();
    cfs(&config).arg("materialize").assert().code(12);
}

#[test]
fn bad_timestamp_exits_with_args_code() {
    let (_dir, config) = project();
    cfs(&config).arg("convert").assert().success();
    cfs(&config).arg("apply").assert().success();
    cfs(&config)
        .args(["materialize", "--start-date", "yesterday"])
        .assert()
        .code(10);
}

#[test]
fn missing_config_file_exits_with_config_code() {
    let dir = TempDir::new().unwrap();
    cfs(&dir.path().join("nope.yaml"))
        .arg("apply")
        .assert()
        .code(11);
}
