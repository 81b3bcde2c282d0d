//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn cli_without_arguments_prints_help() {
    let mut cmd = cargo_bin_cmd!("fileset-csi");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("decode-volume-id"));
}

#[test]
fn decodes_a_lightweight_volume_id() {
    let mut cmd = cargo_bin_cmd!("fileset-csi");
    cmd.args(["decode-volume-id", "1001;0A0B:11;path=/ibm/fs0/csi-store/.volumes/pvc-1"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"shape\": \"lightweight\"")
                .and(predicate::str::contains("\"cluster_id\": \"1001\""))
                .and(predicate::str::contains("/ibm/fs0/csi-store/.volumes/pvc-1")),
        );
}

#[test]
fn decodes_a_snapshot_id_with_default_path() {
    let mut cmd = cargo_bin_cmd!("fileset-csi");
    cmd.args(["decode-snapshot-id", "1001;0A0B:11;pvc-1;snap-1"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"snapshot_name\": \"snap-1\"")
                .and(predicate::str::contains("\"path\": \"/\"")),
        );
}

#[test]
fn rejects_malformed_volume_ids() {
    let mut cmd = cargo_bin_cmd!("fileset-csi");
    cmd.args(["decode-volume-id", "1001;0A0B:11"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid identifier"));
}

#[test]
fn shows_the_effective_configuration() {
    let mut cmd = cargo_bin_cmd!("fileset-csi");
    cmd.arg("show-config")
        .env("SKIP_MOUNT_UNMOUNT", "no")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"mount_policy\": \"mount\""));
}
