//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn cli_without_arguments_prints_help() {
    let mut cmd = cargo_bin_cmd!("pdcsi");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn capabilities_reports_controller_mode() {
    let mut cmd = cargo_bin_cmd!("pdcsi");
    cmd.env_remove("PDCSI_MODE")
        .args(["capabilities", "--mode", "controller"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pd.csi.storage.gke.io"))
        .stdout(predicate::str::contains("CREATE_DELETE_VOLUME"))
        .stdout(predicate::str::contains("\"node_capabilities\": []"))
        .stdout(predicate::str::contains("SINGLE_NODE_WRITER"));
}

#[test]
fn capabilities_rejects_unknown_mode() {
    let mut cmd = cargo_bin_cmd!("pdcsi");
    cmd.args(["capabilities", "--mode", "sidecar"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown driver mode"));
}
