//! End-to-end provisioning scenarios driven over loopback MessagePack-RPC.

#[path = "support/worker.rs"]
mod worker;

use std::sync::Arc;

use mist::test_support::{InMemoryCompute, InMemoryContainers, SequentialNames};
use mist::{CloudVmDriver, ContainerDriver, Driver, Provisioner, RandomNames, RequestHandler};

use worker::{FAST, args, call, field, spawn_worker, status, text, workspace};

fn cloud_driver(
    api: &InMemoryCompute,
    workspace: &worker::Workspace,
) -> CloudVmDriver<InMemoryCompute> {
    CloudVmDriver::new(api.clone(), Arc::clone(&workspace.config)).with_readiness(FAST)
}

#[tokio::test]
async fn create_without_name_returns_generated_ready_host() {
    let workspace = workspace().await;
    let api = InMemoryCompute::new().with_image("ubuntu-os-cloud", "ubuntu-18-minimal-v2", false);
    let provisioner = Provisioner::new(
        cloud_driver(&api, &workspace),
        RandomNames,
        Arc::clone(&workspace.config),
    )
    .with_service_port(workspace.service_port);
    let address = spawn_worker(RequestHandler::new(provisioner, "worker-1")).await;

    let result = call(address, "create", args(&[("distro", "ubuntu"), ("release", "18")])).await;

    assert!(status(&result), "create failed: {result}");
    let name = text(&result, "name");
    let suffix = name
        .strip_prefix("mist-")
        .unwrap_or_else(|| panic!("unexpected name {name}"));
    assert_eq!(suffix.len(), 32);
    assert!(suffix.chars().all(|ch| ch.is_ascii_hexdigit()));
    assert!(!text(&result, "ip").is_empty());
    assert_eq!(text(&result, "username"), workspace.config.username);
    assert_eq!(text(&result, "server"), "worker-1");
}

#[tokio::test]
async fn create_that_never_runs_is_rolled_back() {
    let workspace = workspace().await;
    let api = InMemoryCompute::new()
        .with_image("ubuntu-os-cloud", "ubuntu-18-minimal-v2", false)
        .never_running();
    let driver = cloud_driver(&api, &workspace);
    let probe = cloud_driver(&api, &workspace);
    let provisioner = Provisioner::new(
        driver,
        SequentialNames::default(),
        Arc::clone(&workspace.config),
    )
    .with_service_port(workspace.service_port);
    let address = spawn_worker(RequestHandler::new(provisioner, "worker-1")).await;

    let result = call(address, "create", args(&[("distro", "ubuntu"), ("release", "18")])).await;

    assert!(!status(&result));
    let message = text(&result, "message");
    assert!(message.contains("timed out"), "unexpected message: {message}");
    assert!(field(&result, "name").is_none());
    let still_there = probe
        .exists("mist-1")
        .await
        .unwrap_or_else(|err| panic!("exists: {err}"));
    assert!(!still_there);
    assert!(api.disk_names().is_empty());
}

#[tokio::test]
async fn destroying_a_missing_resource_changes_nothing() {
    let workspace = workspace().await;
    let host = InMemoryContainers::new().with_container("keeper");
    let driver = ContainerDriver::new(host.clone(), Arc::clone(&workspace.config));
    let provisioner = Provisioner::new(
        driver,
        SequentialNames::default(),
        Arc::clone(&workspace.config),
    );
    let address = spawn_worker(RequestHandler::new(provisioner, "worker-1")).await;

    let result = call(address, "destroy", args(&[("name", "ghost")])).await;

    assert!(!status(&result));
    assert_eq!(
        text(&result, "message"),
        "destroy request failed: resource ghost does not exist"
    );
    assert_eq!(text(&result, "name"), "ghost");
    assert_eq!(host.names(), vec!["keeper"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_creates_keep_their_own_results() {
    let workspace = workspace().await;
    let host = InMemoryContainers::new();
    let driver = ContainerDriver::new(host.clone(), Arc::clone(&workspace.config))
        .with_readiness(FAST);
    let provisioner = Provisioner::new(
        driver,
        SequentialNames::default(),
        Arc::clone(&workspace.config),
    )
    .with_service_port(workspace.service_port);
    let address = spawn_worker(RequestHandler::new(provisioner, "worker-1")).await;

    let (first, second) = tokio::join!(
        call(address, "create", args(&[("name", "alpha")])),
        call(address, "create", args(&[("name", "beta")])),
    );

    assert!(status(&first), "alpha failed: {first}");
    assert!(status(&second), "beta failed: {second}");
    assert_eq!(text(&first, "name"), "alpha");
    assert_eq!(text(&second, "name"), "beta");

    let address_of = |name: &str| {
        host.address_of(name)
            .unwrap_or_else(|| panic!("{name} has no address"))
            .to_string()
    };
    assert_eq!(text(&first, "ip"), address_of("alpha"));
    assert_eq!(text(&second, "ip"), address_of("beta"));
    assert_ne!(text(&first, "ip"), text(&second, "ip"));
}

#[tokio::test]
async fn second_destroy_reports_absence() {
    let workspace = workspace().await;
    let host = InMemoryContainers::new().with_running_container("build-3");
    let driver = ContainerDriver::new(host.clone(), Arc::clone(&workspace.config))
        .with_readiness(FAST);
    let provisioner = Provisioner::new(
        driver,
        SequentialNames::default(),
        Arc::clone(&workspace.config),
    );
    let address = spawn_worker(RequestHandler::new(provisioner, "worker-1")).await;

    let first = call(address, "destroy", args(&[("name", "build-3")])).await;
    let second = call(address, "destroy", args(&[("name", "build-3")])).await;

    assert!(status(&first), "first destroy failed: {first}");
    assert_eq!(text(&first, "message"), "destroyed container");
    assert!(!status(&second));
    assert!(text(&second, "message").contains("does not exist"));
    assert!(host.names().is_empty());
}
