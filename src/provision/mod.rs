//! Provisioning engine: the create and destroy workflows.
//!
//! A create request walks a [`ProvisionedResource`] forward through the
//! [`Phase`] sequence. When any step after resolution fails, whatever was
//! partially built is stopped and removed once, and the original error is
//! reported; rollback failures are only logged.

mod create;
mod destroy;

use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::config::MistConfig;
use crate::driver::{BackendKind, BackingStore, Driver, ResourceHandle};
use crate::error::ProvisionError;
use crate::naming::{NameGenerator, RandomNames};

/// TCP port probed for service reachability.
pub const DEFAULT_SERVICE_PORT: u16 = 22;

/// A create request after defaults have been applied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionRequest {
    /// Distribution to install.
    pub distro: String,
    /// Numeric release of the distribution.
    pub release: String,
    /// Explicit resource name; generated when absent.
    pub name: Option<String>,
}

impl ProvisionRequest {
    /// Checks that every field is safe to use as a path component and a
    /// backend resource name.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidArgument`] for the first bad field.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        check_component("distro", &self.distro)?;
        check_component("release", &self.release)?;
        match &self.name {
            Some(name) => check_component("name", name),
            None => Ok(()),
        }
    }
}

/// Accepts `[A-Za-z0-9][A-Za-z0-9._-]*`.
pub(crate) fn check_component(field: &str, value: &str) -> Result<(), ProvisionError> {
    let mut chars = value.chars();
    let valid = chars.next().is_some_and(|first| first.is_ascii_alphanumeric())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::InvalidArgument {
            field: field.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// Progress of a resource through the create workflow.
///
/// Phases are ordered and a resource never moves backwards.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Phase {
    /// Nothing has been created yet.
    Requested,
    /// Disk or template clone exists and is usable.
    BackingStoreReady,
    /// Resource reports running.
    Running,
    /// A network address has been assigned.
    NetworkReady,
    /// The service port accepts connections.
    ServiceReady,
    /// The resource has been handed to the caller.
    Done,
}

/// Progress of a resource through the destroy workflow.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DestroyPhase {
    /// The resource was found.
    Existing,
    /// A shutdown has been requested.
    Stopping,
    /// The resource reports stopped.
    Stopped,
    /// The resource is gone.
    Removed,
}

/// The live object under construction during one create request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionedResource {
    /// Resource name.
    pub name: String,
    /// Kind of backend building the resource.
    pub backend_kind: BackendKind,
    /// Selected address once the network is up.
    pub network_address: Option<IpAddr>,
    phase: Phase,
    backing_store: Option<BackingStore>,
    handle: Option<ResourceHandle>,
}

impl ProvisionedResource {
    fn new(name: String, backend_kind: BackendKind) -> Self {
        Self {
            name,
            backend_kind,
            network_address: None,
            phase: Phase::Requested,
            backing_store: None,
            handle: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "phase must move forward");
        if next > self.phase {
            tracing::info!(name = %self.name, phase = ?next, "phase reached");
            self.phase = next;
        }
    }
}

/// A ready-to-use resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Provisioned {
    /// Resource name.
    pub name: String,
    /// Address callers should connect to.
    pub ip: IpAddr,
    /// Operator account on the resource.
    pub username: String,
    /// Kind of resource.
    pub kind: BackendKind,
}

/// A create request that failed, with the phase it had reached.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{cause}")]
pub struct ProvisionFailure {
    /// Resource name, when one had been allocated.
    pub name: Option<String>,
    /// Last phase reached before the failure.
    pub at: Phase,
    /// Original error; never replaced by rollback errors.
    pub cause: ProvisionError,
}

/// Orchestrates resolver, driver, and poller for create and destroy.
#[derive(Debug)]
pub struct Provisioner<D, N = RandomNames> {
    driver: D,
    names: N,
    config: Arc<MistConfig>,
    service_port: u16,
}

impl<D: Driver, N: NameGenerator> Provisioner<D, N> {
    /// Creates an engine around `driver`.
    pub const fn new(driver: D, names: N, config: Arc<MistConfig>) -> Self {
        Self {
            driver,
            names,
            config,
            service_port: DEFAULT_SERVICE_PORT,
        }
    }

    /// Overrides the probed service port.
    ///
    /// This is primarily used by tests that stand up a local listener.
    #[must_use]
    pub const fn with_service_port(mut self, port: u16) -> Self {
        self.service_port = port;
        self
    }

    /// The driver this engine provisions through.
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Worker configuration.
    pub fn config(&self) -> &MistConfig {
        &self.config
    }
}
