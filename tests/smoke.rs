//! Smoke tests -- verify the binary runs and the verdict surface holds.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("peerbench")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Peer-driven benchmark and capture tests",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("peerbench")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("peerbench"));
}

#[test]
fn test_run_subcommand_exists() {
    Command::cargo_bin("peerbench")
        .unwrap()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--expected-throughput"));
}

#[test]
fn test_list_names_all_cases() {
    let assert = Command::cargo_bin("peerbench")
        .unwrap()
        .arg("list")
        .assert()
        .success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for case in ["iperf", "uperf", "tcpdump", "perf-probe"] {
        assert!(output.contains(case), "missing case {case} in list output");
    }
}

#[test]
fn test_preflight_subcommand_exists() {
    Command::cargo_bin("peerbench")
        .unwrap()
        .args(["preflight", "--help"])
        .assert()
        .success();
}

#[test]
fn test_missing_interface_skips_with_exit_code_2() {
    Command::cargo_bin("peerbench")
        .unwrap()
        .args([
            "run",
            "iperf",
            "--interface",
            "pbench-missing0",
            "--peer-ip",
            "10.0.0.2",
        ])
        .assert()
        .code(2)
        .stdout(predicates::str::contains("SKIP"));
}

#[test]
fn test_missing_peer_skips_before_touching_the_host() {
    // lo always exists; the empty peer address must short-circuit the run.
    Command::cargo_bin("peerbench")
        .unwrap()
        .args(["run", "iperf", "--interface", "lo"])
        .assert()
        .code(2)
        .stdout(predicates::str::contains("peer address"));
}
