//! End-to-end tests for the `oci-resource-dump` binary: config generation,
//! diff mode, and the startup error paths that need no cloud access.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A command pinned to a scratch config file so host configuration and
/// credentials never leak into the tests.
fn cmd() -> (Command, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(&config, "version: 1\n").unwrap();

    let mut cmd = Command::cargo_bin("oci-resource-dump").expect("binary builds");
    cmd.env_remove("OCI_DUMP_SECURITY_TOKEN")
        .env("OCI_DUMP_CONFIG_FILE", &config);
    (cmd, dir)
}

fn write_snapshots(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let record = |name: &str, tag: &str, shape: &str| {
        serde_json::json!({
            "resource_type": "compute_instance",
            "compartment_name": "prod",
            "resource_name": name,
            "ocid": format!("ocid1.instance.oc1..{tag}"),
            "compartment_id": "ocid1.compartment.oc1..cccc",
            "additional_info": {"shape": shape}
        })
    };

    let old = serde_json::json!([
        record("web-server-01", "web1", "VM.Standard2.1"),
        record("web-server-02", "web2", "VM.Standard2.1"),
        record("cache-01", "cache1", "VM.Standard2.1"),
    ]);
    let new = serde_json::json!([
        record("web-server-01", "web1", "VM.Standard3.Flex"),
        record("web-server-03", "web3", "VM.Standard3.Flex"),
        record("cache-01", "cache1", "VM.Standard2.1"),
    ]);

    let old_path = dir.join("old.json");
    let new_path = dir.join("new.json");
    std::fs::write(&old_path, serde_json::to_string_pretty(&old).unwrap()).unwrap();
    std::fs::write(&new_path, serde_json::to_string_pretty(&new).unwrap()).unwrap();
    (old_path, new_path)
}

#[test]
fn generate_config_prints_a_parseable_default_file() {
    let (mut cmd, _dir) = cmd();
    cmd.arg("--generate-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("version: 1"))
        .stdout(predicate::str::contains("max_workers: 5"))
        .stdout(predicate::str::contains("timeout: 300"));
}

#[test]
fn diff_text_mode_reports_all_sections() {
    let (mut cmd, dir) = cmd();
    let (old, new) = write_snapshots(dir.path());

    cmd.arg("--compare-files")
        .arg(format!("{},{}", old.display(), new.display()))
        .assert()
        .success()
        .stdout(predicate::str::contains("SUMMARY"))
        .stdout(predicate::str::contains(
            "Added: 1, Removed: 1, Modified: 1, Unchanged: 1",
        ))
        .stdout(predicate::str::contains("ADDED RESOURCES (1)"))
        .stdout(predicate::str::contains("+ ComputeInstance prod/web-server-03"))
        .stdout(predicate::str::contains("- ComputeInstance prod/web-server-02"))
        .stdout(predicate::str::contains(
            "additional_info.shape: VM.Standard2.1 -> VM.Standard3.Flex",
        ));
}

#[test]
fn diff_json_mode_is_machine_readable() {
    let (mut cmd, dir) = cmd();
    let (old, new) = write_snapshots(dir.path());
    let out = dir.path().join("diff.json");

    cmd.arg("--compare-files")
        .arg(format!("{},{}", old.display(), new.display()))
        .args(["--diff-format", "json"])
        .arg("--diff-output")
        .arg(&out)
        .assert()
        .success();

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(report["summary"]["added"], 1);
    assert_eq!(report["summary"]["removed"], 1);
    assert_eq!(report["summary"]["modified"], 1);
    assert_eq!(report["summary"]["unchanged"], 1);
    // Unchanged detail is elided unless requested.
    assert!(report.get("unchanged").is_none());
    assert!(report["old_file"].as_str().unwrap().ends_with("old.json"));
}

#[test]
fn diff_detailed_mode_lists_unchanged_resources() {
    let (mut cmd, dir) = cmd();
    let (old, new) = write_snapshots(dir.path());

    cmd.arg("--compare-files")
        .arg(format!("{},{}", old.display(), new.display()))
        .args(["--diff-format", "json", "--diff-detailed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"unchanged\""))
        .stdout(predicate::str::contains("cache-01"));
}

#[test]
fn identical_diff_paths_exit_2() {
    let (mut cmd, dir) = cmd();
    let (old, _) = write_snapshots(dir.path());

    cmd.arg("--compare-files")
        .arg(format!("{},{}", old.display(), old.display()))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("identical"));
}

#[test]
fn missing_diff_input_exits_2() {
    let (mut cmd, dir) = cmd();
    let (old, _) = write_snapshots(dir.path());

    cmd.arg("--compare-files")
        .arg(format!(
            "{},{}",
            old.display(),
            dir.path().join("absent.json").display()
        ))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn malformed_diff_input_exits_2() {
    let (mut cmd, dir) = cmd();
    let (old, _) = write_snapshots(dir.path());
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{oops").unwrap();

    cmd.arg("--compare-files")
        .arg(format!("{},{}", old.display(), bad.display()))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("malformed"));
}

#[test]
fn unknown_resource_type_is_a_config_error() {
    let (mut cmd, _dir) = cmd();
    cmd.args(["--resource-types", "warp_drives"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown resource type"));
}

#[test]
fn bad_name_filter_regex_is_a_config_error() {
    let (mut cmd, _dir) = cmd();
    cmd.args(["--name-filter", "]("])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid name pattern"));
}

#[test]
fn malformed_config_file_is_fatal_at_startup() {
    let (mut cmd, dir) = cmd();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "timeout: [broken\n").unwrap();

    cmd.env("OCI_DUMP_CONFIG_FILE", &path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("malformed config file"));
}

#[test]
fn unsupported_config_version_is_fatal_at_startup() {
    let (mut cmd, dir) = cmd();
    let path = dir.path().join("future.yaml");
    std::fs::write(&path, "version: 99\n").unwrap();

    cmd.env("OCI_DUMP_CONFIG_FILE", &path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unsupported config version 99"));
}

#[test]
fn discovery_without_credentials_fails_fast_with_exit_1() {
    let (mut cmd, _dir) = cmd();
    cmd.args(["--timeout", "5"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("credential acquisition failed"));
}
