#![allow(deprecated)] // cargo_bin! macro doesn't exist yet in assert_cmd 2.1

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn davmount() -> Command {
    let mut cmd = Command::cargo_bin("davmount").unwrap();
    cmd.env_remove("DAVMOUNT_CONFIG");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// A source tree with a couple of folders and files.
fn create_source() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let root = dir.path();
    fs::create_dir_all(root.join("documents/archive")).unwrap();
    fs::write(root.join("documents/notes.txt"), "remember the milk\n").unwrap();
    fs::write(root.join("documents/report.pdf"), vec![0u8; 3000]).unwrap();
    fs::write(root.join("documents/archive/2023.txt"), "old").unwrap();
    fs::write(root.join("readme.md"), "# hello\n").unwrap();
    dir
}

// ============================================================================
// Basic CLI tests
// ============================================================================

#[test]
fn test_help() {
    davmount()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Inspect a davmount volume offline"))
        .stdout(predicate::str::contains("ls"))
        .stdout(predicate::str::contains("cat"))
        .stdout(predicate::str::contains("tree"))
        .stdout(predicate::str::contains("stats"));
}

#[test]
fn test_version() {
    davmount()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("davmount"));
}

#[test]
fn test_missing_source() {
    davmount()
        .args(["ls", "/definitely/not/here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

// ============================================================================
// ls
// ============================================================================

#[test]
fn test_ls_root() {
    let source = create_source();
    davmount()
        .arg("ls")
        .arg(source.path())
        .assert()
        .success()
        .stdout("documents/\nreadme.md\n");
}

#[test]
fn test_ls_all_includes_dot_entries() {
    let source = create_source();
    davmount()
        .arg("ls")
        .arg(source.path())
        .args(["-a", "/documents"])
        .assert()
        .success()
        .stdout(".\n..\narchive/\nnotes.txt\nreport.pdf\n");
}

#[test]
fn test_ls_pattern_and_marker() {
    let source = create_source();
    davmount()
        .arg("ls")
        .arg(source.path())
        .args(["--pattern", "*.TXT", "/documents"])
        .assert()
        .success()
        .stdout("notes.txt\n");

    davmount()
        .arg("ls")
        .arg(source.path())
        .args(["--marker", "archive", "/documents"])
        .assert()
        .success()
        .stdout("notes.txt\nreport.pdf\n");
}

#[test]
fn test_ls_json() {
    let source = create_source();
    let output = davmount()
        .arg("ls")
        .arg(source.path())
        .args(["--json", "/documents"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["path"], "/documents");
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["name"], "archive");
    assert_eq!(entries[0]["type"], "directory");
    assert_eq!(entries[2]["name"], "report.pdf");
    assert_eq!(entries[2]["size"], 3000);
}

#[test]
fn test_ls_long() {
    let source = create_source();
    davmount()
        .arg("ls")
        .arg(source.path())
        .args(["-l", "/documents"])
        .assert()
        .success()
        .stdout(predicate::str::contains("report.pdf"))
        .stdout(predicate::str::contains("2.9K"));
}

#[test]
fn test_ls_missing_path_exit_code() {
    let source = create_source();
    davmount()
        .arg("ls")
        .arg(source.path())
        .arg("/nope")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("not found"));
}

// ============================================================================
// cat / stat / tree / stats
// ============================================================================

#[test]
fn test_cat() {
    let source = create_source();
    davmount()
        .arg("cat")
        .arg(source.path())
        .arg("/documents/notes.txt")
        .assert()
        .success()
        .stdout("remember the milk\n");
}

#[test]
fn test_cat_directory_fails() {
    let source = create_source();
    davmount()
        .arg("cat")
        .arg(source.path())
        .arg("/documents")
        .assert()
        .failure();
}

#[test]
fn test_stat_json() {
    let source = create_source();
    let output = davmount()
        .arg("stat")
        .arg(source.path())
        .args(["--json", "/documents/report.pdf"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["path"], "/documents/report.pdf");
    assert_eq!(json["repository_path"], "/dav/documents/report.pdf");
    assert_eq!(json["info"]["file_size"], 3000);
    assert_eq!(json["info"]["allocation_size"], 4096);
}

#[test]
fn test_tree() {
    let source = create_source();
    davmount()
        .arg("tree")
        .arg(source.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("├── documents"))
        .stdout(predicate::str::contains("2023.txt"))
        .stdout(predicate::str::contains("2 directories, 4 files"));
}

#[test]
fn test_tree_depth_limit() {
    let source = create_source();
    davmount()
        .arg("tree")
        .arg(source.path())
        .args(["-L", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2023.txt").not())
        .stdout(predicate::str::contains("1 directories, 1 files"));
}

#[test]
fn test_stats_json() {
    let source = create_source();
    let output = davmount()
        .arg("stats")
        .arg(source.path())
        .args(["--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["entries"], 6);
    assert!(json["stats"]["hits"].as_u64().unwrap() > 0);
    assert_eq!(json["volume"]["volume_label"], "davFS");
}

#[test]
fn test_config_file_and_no_cache() {
    let source = create_source();
    let config_dir = TempDir::new().unwrap();
    let config = config_dir.path().join("mount.json");
    fs::write(
        &config,
        r#"{ "repository_root": "/remote/files", "volume_label": "Shared" }"#,
    )
    .unwrap();

    let output = davmount()
        .arg("--config")
        .arg(&config)
        .arg("--no-cache")
        .arg("stats")
        .arg(source.path())
        .args(["--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["cached_nodes"], 0);
    assert_eq!(json["volume"]["volume_label"], "Shared");
}

#[test]
fn test_invalid_config_fails() {
    let source = create_source();
    let config_dir = TempDir::new().unwrap();
    let config = config_dir.path().join("mount.json");
    fs::write(&config, r#"{ "repository_root": "relative" }"#).unwrap();

    davmount()
        .arg("--config")
        .arg(&config)
        .arg("ls")
        .arg(source.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
