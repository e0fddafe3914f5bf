//! Binary entry point for the `mist` provisioning worker.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use mist::{
    BASE_PORT, BackendKind, CloudVmDriver, ConfigError, ContainerDriver, Driver, MistConfig,
    Provisioner, RandomNames, RequestHandler, RpcServer,
};

mod cli;

use cli::{Cli, DriverKind};

#[derive(Debug, Error)]
enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("worker id {0} moves the port past 65535")]
    PortOutOfRange(u16),
    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: String,
        source: io::Error,
    },
    #[error("rpc server stopped: {0}")]
    Serve(io::Error),
}

const fn backend_kind(driver: DriverKind) -> BackendKind {
    match driver {
        DriverKind::Gce => BackendKind::CloudVm,
        DriverKind::Lxc => BackendKind::Container,
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match run(&cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: &Cli) -> Result<(), WorkerError> {
    let config = Arc::new(MistConfig::load_without_cli_args()?);
    config.validate_for(backend_kind(cli.driver))?;

    let port = BASE_PORT
        .checked_add(cli.worker_id)
        .ok_or(WorkerError::PortOutOfRange(cli.worker_id))?;
    let address = format!("{}:{port}", config.listen_address);

    match cli.driver {
        DriverKind::Gce => {
            let driver = CloudVmDriver::from_config(Arc::clone(&config))?;
            serve(driver, config, &address).await
        }
        DriverKind::Lxc => {
            let driver = ContainerDriver::with_lxc(Arc::clone(&config));
            serve(driver, config, &address).await
        }
    }
}

async fn serve<D: Driver + 'static>(
    driver: D,
    config: Arc<MistConfig>,
    address: &str,
) -> Result<(), WorkerError> {
    let kind = driver.kind();
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let provisioner = Provisioner::new(driver, RandomNames, config);
    let handler = Arc::new(RequestHandler::new(provisioner, hostname));

    let server = RpcServer::bind(address, handler)
        .await
        .map_err(|source| WorkerError::Bind {
            address: address.to_owned(),
            source,
        })?;
    tracing::info!(%address, ?kind, "worker listening");
    server.serve().await.map_err(WorkerError::Serve)
}

fn report_error(err: &WorkerError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &WorkerError) {
    writeln!(target, "{err}").ok();
}
