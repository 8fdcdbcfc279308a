//! Integration tests for the kscli binary
//!
//! These verify the CLI surface: argument parsing, the offline render
//! subcommand, status reporting and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a test kscli command
fn kscli() -> Command {
    Command::cargo_bin("kscli").unwrap()
}

#[test]
fn test_help_command() {
    kscli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("VPN Kill-Switch Control CLI"));
}

#[test]
fn test_render_full_facts() {
    kscli()
        .args([
            "render",
            "--physical", "en0",
            "--tunnel", "utun3",
            "--local", "10.8.0.2",
            "--remote", "203.0.113.9",
            "--dns", "1.1.1.1",
            "--dns", "8.8.8.8",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("phys_if = \"en0\""))
        .stdout(predicate::str::contains("vpn_if = \"utun3\""))
        .stdout(predicate::str::contains("block all"))
        .stdout(predicate::str::contains("block out quick inet6 all"))
        .stdout(predicate::str::contains("to 1.1.1.1 port 53"))
        .stdout(predicate::str::contains("to 8.8.8.8 port 53"))
        .stdout(predicate::str::contains("to 203.0.113.9 port { 500, 4500, 1701 }"))
        .stdout(predicate::str::contains("pass on $vpn_if all keep state"));
}

#[test]
fn test_render_without_remote_widens() {
    kscli()
        .args([
            "render",
            "--physical", "en0",
            "--tunnel", "utun3",
            "--local", "10.8.0.2",
            "--dns", "9.9.9.9",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("to any port { 500, 4500, 1701 }"));
}

#[test]
fn test_render_rejects_bad_address() {
    kscli()
        .args([
            "render",
            "--physical", "en0",
            "--tunnel", "utun3",
            "--local", "not-an-address",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_render_rejects_hostile_interface_name() {
    kscli()
        .args([
            "render",
            "--physical", "en0; rm -rf /",
            "--tunnel", "utun3",
            "--local", "10.8.0.2",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_status_with_empty_state() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("ksctl.toml");
    fs::write(
        &config_path,
        format!(
            "[paths]\nstate_dir = \"{}\"\npf_conf_path = \"{}\"\n",
            tmp.path().join("run").display(),
            tmp.path().join("pf.conf").display(),
        ),
    )
    .unwrap();

    kscli()
        .arg("--config")
        .arg(&config_path)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("monitor: Inactive"))
        .stdout(predicate::str::contains("loaded: no"));
}

#[test]
fn test_missing_config_falls_back_to_defaults_for_render() {
    kscli()
        .args([
            "--config", "/nonexistent/ksctl.toml",
            "render",
            "--physical", "en0",
            "--tunnel", "utun3",
            "--local", "10.8.0.2",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("set block-policy drop"));
}

#[test]
fn test_unknown_subcommand_fails() {
    kscli()
        .arg("explode")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage").or(predicate::str::contains("error")));
}
