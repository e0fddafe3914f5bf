//! Capability contract shared by the cloud VM and local container drivers.
//!
//! The provisioning engine only talks to backends through [`Driver`]. A worker
//! selects one implementation at startup; nothing downstream inspects which.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::Duration;

use crate::assets::StartupAssets;
use crate::error::ProvisionError;
use crate::resolver;

/// Future returned by driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProvisionError>> + Send + 'a>>;

/// Which kind of compute resource a driver materialises.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BackendKind {
    /// A cloud virtual machine.
    CloudVm,
    /// A local lightweight container.
    Container,
}

impl BackendKind {
    /// Subdirectory of the startup-script root holding this kind's scripts.
    #[must_use]
    pub const fn script_dir(self) -> &'static str {
        match self {
            Self::CloudVm => "gce",
            Self::Container => "lxc",
        }
    }

    /// Noun used in user-facing result messages.
    #[must_use]
    pub const fn noun(self) -> &'static str {
        match self {
            Self::CloudVm => "instance",
            Self::Container => "container",
        }
    }
}

/// An image or template as enumerated by a backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceImage {
    /// Short name matched against `<distro>-<release>...`.
    pub name: String,
    /// Identifier the backend needs to clone from (for example a self link).
    pub identifier: String,
    /// Whether the backend marks the entry deprecated or disabled.
    pub deprecated: bool,
    /// Disk size in GB the image requires; zero when not applicable.
    pub size_gb: u64,
}

/// Result of resolving a distribution and release.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceSpec {
    /// Image or template identifier.
    pub identifier: String,
    /// Disk size hint in GB (zero for templates).
    pub size_hint: u64,
}

/// Everything a driver needs to build one resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildPlan {
    /// Resource name.
    pub name: String,
    /// Requested distribution.
    pub distro: String,
    /// Requested release.
    pub release: String,
    /// Resolved image or template.
    pub source: SourceSpec,
    /// Startup script and operator key injected into the resource.
    pub assets: StartupAssets,
}

/// Disk or template clone backing a resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackingStore {
    /// Backend identifier of the store.
    pub id: String,
}

/// Handle to a created instance or container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceHandle {
    /// Resource name, unique within the backend.
    pub name: String,
}

impl ResourceHandle {
    /// Creates a handle for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Interval and budget for one readiness wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Pause between predicate evaluations.
    pub interval: Duration,
    /// Total budget measured from the first evaluation.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Per-stage readiness budgets a driver requires.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadinessPlan {
    /// Disk or clone ready.
    pub backing_store: PollPolicy,
    /// Resource reports running.
    pub running: PollPolicy,
    /// At least one network address assigned.
    pub network: PollPolicy,
    /// Service port accepts TCP connections.
    pub service: PollPolicy,
    /// Resource reports stopped during teardown.
    pub stopped: PollPolicy,
    /// Resource no longer visible after removal.
    pub removed: PollPolicy,
    /// Unconditional pause after the service answers.
    pub settle: Duration,
}

impl ReadinessPlan {
    /// Uses one policy for every stage and no settle delay.
    #[must_use]
    pub const fn uniform(policy: PollPolicy) -> Self {
        Self {
            backing_store: policy,
            running: policy,
            network: policy,
            service: policy,
            stopped: policy,
            removed: policy,
            settle: Duration::ZERO,
        }
    }

    /// Overrides the settle delay.
    #[must_use]
    pub const fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Overrides the running-state policy.
    #[must_use]
    pub const fn with_running(mut self, policy: PollPolicy) -> Self {
        self.running = policy;
        self
    }
}

/// Operations every backend exposes to the provisioning engine.
///
/// Implementations are shared by all in-flight requests of a worker and must
/// therefore tolerate concurrent calls for distinct resource names.
pub trait Driver: Send + Sync {
    /// Kind of resource this driver materialises.
    fn kind(&self) -> BackendKind;

    /// Readiness budgets for this backend.
    fn readiness(&self) -> ReadinessPlan;

    /// Enumerates candidate images or templates in backend order.
    fn list_sources(&self) -> DriverFuture<'_, Vec<SourceImage>>;

    /// Resolves `distro`/`release` to a source. The default applies the
    /// generic first-match resolver to [`Driver::list_sources`].
    fn resolve_source<'a>(
        &'a self,
        distro: &'a str,
        release: &'a str,
    ) -> DriverFuture<'a, SourceSpec> {
        Box::pin(async move {
            let sources = self.list_sources().await?;
            resolver::resolve(distro, release, &sources)
        })
    }

    /// Creates the disk or template clone for `plan`.
    fn create_backing_store<'a>(&'a self, plan: &'a BuildPlan) -> DriverFuture<'a, BackingStore>;

    /// Reports whether the backing store can be attached.
    fn is_backing_store_ready<'a>(&'a self, store: &'a BackingStore) -> DriverFuture<'a, bool>;

    /// Deletes a backing store that never became part of a resource.
    fn discard_backing_store<'a>(&'a self, store: &'a BackingStore) -> DriverFuture<'a, ()>;

    /// Creates the instance or container from its backing store.
    fn create_resource<'a>(
        &'a self,
        plan: &'a BuildPlan,
        store: &'a BackingStore,
    ) -> DriverFuture<'a, ResourceHandle>;

    /// Boots the resource.
    fn start<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, ()>;

    /// Reports whether the resource is running.
    fn is_running<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, bool>;

    /// Reports whether the resource has stopped (or vanished).
    fn is_stopped<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, bool>;

    /// Addresses assigned to the resource, preferred address first.
    fn network_addresses<'a>(&'a self, handle: &'a ResourceHandle)
    -> DriverFuture<'a, Vec<IpAddr>>;

    /// Hook run once the network is up and before the service wait.
    fn prepare_service<'a>(
        &'a self,
        plan: &'a BuildPlan,
        handle: &'a ResourceHandle,
    ) -> DriverFuture<'a, ()> {
        let _ = (plan, handle);
        Box::pin(async { Ok::<(), ProvisionError>(()) })
    }

    /// Requests a shutdown of the resource.
    fn stop<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, ()>;

    /// Removes the resource and everything attached to it.
    fn destroy<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, ()>;

    /// Reports whether a resource called `name` exists.
    fn exists<'a>(&'a self, name: &'a str) -> DriverFuture<'a, bool>;
}
