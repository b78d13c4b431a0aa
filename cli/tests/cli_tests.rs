use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A configuration with its directory database and audit logs inside a temporary directory
fn create_config() -> (TempDir, std::path::PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let config_path = root.join("sgroups.yaml");
    fs::write(
        &config_path,
        format!(
            r#"directory:
  url: {:?}
  base_dn: dc=nodomain
  groups_dn: ou=groups,dc=nodomain
subject_sources:
  - dn: ou=people,dc=nodomain
    name: Users
    display_attrs: [uid, displayName]
    id_attrs: [uid]
    search_filter: "(|(uid=%TERM%)(displayName=*%TERM%*))"
log_dir: {:?}
"#,
            root.join("data").join("directory.db"),
            root.join("logs")
        ),
    )
    .unwrap();
    (temp_dir, config_path)
}

fn sgroupsctl(config_path: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("sgroupsctl").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("SGROUPS_LOG_DIR")
        .arg("--config")
        .arg(config_path);
    cmd
}

#[test]
fn test_help() {
    let mut cmd = Command::cargo_bin("sgroupsctl").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Administration of sgroups"))
        .stdout(predicate::str::contains("cron"))
        .stdout(predicate::str::contains("test-remote"));
}

#[test]
fn test_version() {
    let mut cmd = Command::cargo_bin("sgroupsctl").unwrap();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("sgroupsctl"));
}

#[test]
fn test_missing_config() {
    let temp_dir = TempDir::new().unwrap();
    sgroupsctl(&temp_dir.path().join("nope.yaml"))
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_config_check() {
    let (_temp_dir, config_path) = create_config();
    sgroupsctl(&config_path)
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"))
        .stdout(predicate::str::contains("ou=groups,dc=nodomain"));
}

#[test]
fn test_config_show_fills_defaults() {
    let (_temp_dir, config_path) = create_config();
    let output = sgroupsctl(&config_path)
        .args(["config", "show", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["stem"]["separator"], ".");
    assert_eq!(config["groups_flattened_attr"]["member"], "member");
}

#[test]
fn test_init_then_show_root() {
    let (_temp_dir, config_path) = create_config();
    sgroupsctl(&config_path)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Root stem created"));
    sgroupsctl(&config_path)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));

    let output = sgroupsctl(&config_path)
        .args(["show", "", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let root: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(root["right"], "admin");
    assert_eq!(root["stem"]["children"], serde_json::json!({}));
}

#[test]
fn test_show_needs_rights() {
    let (_temp_dir, config_path) = create_config();
    sgroupsctl(&config_path).arg("init").assert().success();
    sgroupsctl(&config_path)
        .args(["--as-user", "u1", "show", ""])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_invalid_remote_query() {
    let (_temp_dir, config_path) = create_config();
    sgroupsctl(&config_path).arg("init").assert().success();
    sgroupsctl(&config_path)
        .args(["test-remote", "", "http://nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown remote query"));
}

#[test]
fn test_unknown_format() {
    let (_temp_dir, config_path) = create_config();
    sgroupsctl(&config_path)
        .args(["config", "show", "--format", "xml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown format"));
}
