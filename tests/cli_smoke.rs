//! Behavioural smoke tests for the binaries' argument handling.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

#[test]
fn worker_help_lists_driver_choices() {
    let mut cmd = cargo_bin_cmd!("mist");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("--driver"))
        .stdout(contains("--worker-id"))
        .stdout(contains("gce"));
}

#[test]
fn worker_requires_a_driver() {
    let mut cmd = cargo_bin_cmd!("mist");
    cmd.env_remove("MIST_DRIVER")
        .assert()
        .failure()
        .stderr(contains("--driver"));
}

#[test]
fn worker_rejects_unknown_drivers() {
    let mut cmd = cargo_bin_cmd!("mist");
    cmd.args(["--driver", "docker"])
        .assert()
        .failure()
        .stderr(contains("invalid value 'docker'"));
}

#[test]
fn client_destroy_requires_a_name() {
    let mut cmd = cargo_bin_cmd!("mist-client");
    cmd.arg("destroy")
        .assert()
        .failure()
        .stderr(contains("--name"));
}

#[test]
fn cloud_worker_without_project_exits_with_actionable_error() {
    let home = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let mut cmd = cargo_bin_cmd!("mist");
    cmd.env("HOME", home.path())
        .env_remove("MIST_GCE_PROJECT")
        .env_remove("MIST_CONFIG_PATH")
        .args(["--driver", "gce"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("MIST_GCE_PROJECT"));
}
