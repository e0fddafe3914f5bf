//! Operations the container driver needs from a container host.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

use crate::command::CommandError;
use crate::error::ProvisionError;

/// Future returned by [`ContainerRuntime`] calls.
pub type RuntimeFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ContainerRuntimeError>> + Send + 'a>>;

/// Errors raised by container runtimes.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ContainerRuntimeError {
    /// A host command failed or could not be started.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// The host reported something the runtime could not interpret.
    #[error("unexpected output from {program}: {output}")]
    UnexpectedOutput {
        /// Command whose output was rejected.
        program: String,
        /// Offending output.
        output: String,
    },
}

impl From<ContainerRuntimeError> for ProvisionError {
    fn from(value: ContainerRuntimeError) -> Self {
        Self::provider(value.to_string())
    }
}

/// Lifecycle state reported for a container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContainerState {
    /// The container is up.
    Running,
    /// The container is defined but not running.
    Stopped,
    /// The container is booting.
    Starting,
    /// The container is shutting down.
    Stopping,
    /// Any other state string reported by the host.
    Other(String),
}

impl ContainerState {
    /// Parses the state keyword printed by the host tools.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "STOPPED" => Self::Stopped,
            "STARTING" => Self::Starting,
            "STOPPING" => Self::Stopping,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Container host operations used by [`super::ContainerDriver`].
pub trait ContainerRuntime: Send + Sync {
    /// Names of every defined container, templates included.
    fn list(&self) -> RuntimeFuture<'_, Vec<String>>;

    /// Builds template `template` from the distribution image server.
    fn build_template<'a>(
        &'a self,
        template: &'a str,
        distro: &'a str,
        release: &'a str,
    ) -> RuntimeFuture<'a, ()>;

    /// Fast-clones `template` into a new stopped container `name`.
    fn clone_container<'a>(&'a self, template: &'a str, name: &'a str) -> RuntimeFuture<'a, ()>;

    /// Starts `name` in the background.
    fn start<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()>;

    /// Stops `name`.
    fn stop<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()>;

    /// Removes `name` and its root filesystem.
    fn destroy<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()>;

    /// Current state, or `None` when `name` is not defined.
    fn state<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, Option<ContainerState>>;

    /// Addresses assigned to `name`, IPv4 first.
    fn ip_addresses<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, Vec<IpAddr>>;

    /// Runs `script` inside `name` with only `env` in its environment.
    fn run_script<'a>(
        &'a self,
        name: &'a str,
        script: &'a str,
        env: &'a [(String, String)],
    ) -> RuntimeFuture<'a, ()>;

    /// Reports whether `name` is defined.
    fn exists<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, bool> {
        Box::pin(async move {
            let names = self.list().await?;
            Ok::<bool, ContainerRuntimeError>(names.iter().any(|candidate| candidate == name))
        })
    }
}
