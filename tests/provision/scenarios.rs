//! BDD scenarios for provisioning and teardown.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisionContext, provision_context};

#[scenario(
    path = "tests/features/provision.feature",
    name = "Provision a container on demand"
)]
fn scenario_provision_container(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Roll back a container that never starts"
)]
fn scenario_roll_back_stalled_container(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Refuse to destroy an unknown resource"
)]
fn scenario_refuse_unknown_destroy(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Destroy a running container"
)]
fn scenario_destroy_running_container(provision_context: ProvisionContext) {
    let _ = provision_context;
}
