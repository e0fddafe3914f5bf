//! Shared fixtures for provisioning BDD scenarios.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use mist::container::ContainerDriver;
use mist::driver::{PollPolicy, ReadinessPlan};
use mist::test_support::{InMemoryContainers, SequentialNames, write_assets};
use mist::{CreateResult, DestroyResult, MistConfig, Provisioner, RequestHandler};
use rstest::fixture;
use tempfile::TempDir;

const FAST: ReadinessPlan = ReadinessPlan::uniform(PollPolicy::new(
    Duration::from_millis(10),
    Duration::from_millis(300),
));

/// Wire-level outcome of the last request.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub status: bool,
    pub message: String,
    pub name: Option<String>,
}

impl From<CreateResult> for Outcome {
    fn from(result: CreateResult) -> Self {
        Self {
            status: result.status,
            message: result.message,
            name: result.name,
        }
    }
}

impl From<DestroyResult> for Outcome {
    fn from(result: DestroyResult) -> Self {
        Self {
            status: result.status,
            message: result.message,
            name: result.name,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProvisionContext {
    pub host: InMemoryContainers,
    pub config: Arc<MistConfig>,
    pub service_port: u16,
    pub outcome: Option<Outcome>,
    _assets: Arc<TempDir>,
    _listener: Arc<TcpListener>,
}

impl ProvisionContext {
    pub fn handler(&self) -> RequestHandler<ContainerDriver<InMemoryContainers>, SequentialNames> {
        let driver =
            ContainerDriver::new(self.host.clone(), Arc::clone(&self.config)).with_readiness(FAST);
        let provisioner =
            Provisioner::new(driver, SequentialNames::default(), Arc::clone(&self.config))
                .with_service_port(self.service_port);
        RequestHandler::new(provisioner, "bdd-worker")
    }

    pub fn outcome(&self) -> &Outcome {
        self.outcome
            .as_ref()
            .unwrap_or_else(|| panic!("scenario did not record an outcome"))
    }
}

#[fixture]
pub fn provision_context() -> ProvisionContext {
    let assets = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(assets.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()));
    let config = write_assets(&root, &["ubuntu"]).unwrap_or_else(|err| panic!("assets: {err}"));

    let listener = TcpListener::bind("0.0.0.0:0")
        .unwrap_or_else(|err| panic!("bind service listener: {err}"));
    let service_port = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("listener address: {err}"))
        .port();

    ProvisionContext {
        host: InMemoryContainers::new(),
        config: Arc::new(config),
        service_port,
        outcome: None,
        _assets: Arc::new(assets),
        _listener: Arc::new(listener),
    }
}
