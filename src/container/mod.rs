//! Local container driver.
//!
//! Templates are ordinary containers named `<distro>-<release>-v1`. A missing
//! template is built on demand from the distribution image server, then the
//! new container is cloned from it, started, and configured by running the
//! startup script inside it once the network is up.

mod lxc;
mod runtime;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub use lxc::LxcRuntime;
pub use runtime::{ContainerRuntime, ContainerRuntimeError, ContainerState, RuntimeFuture};

use crate::config::MistConfig;
use crate::driver::{
    BackendKind, BackingStore, BuildPlan, Driver, DriverFuture, PollPolicy, ReadinessPlan,
    ResourceHandle, SourceImage, SourceSpec,
};
use crate::error::ProvisionError;
use crate::resolver;

const WAIT_INTERVAL: Duration = Duration::from_millis(500);

/// Readiness budgets for containers.
pub const CONTAINER_READINESS: ReadinessPlan = ReadinessPlan {
    backing_store: PollPolicy::new(WAIT_INTERVAL, Duration::from_secs(30)),
    running: PollPolicy::new(WAIT_INTERVAL, Duration::from_secs(30)),
    network: PollPolicy::new(WAIT_INTERVAL, Duration::from_secs(30)),
    service: PollPolicy::new(WAIT_INTERVAL, Duration::from_secs(30)),
    stopped: PollPolicy::new(WAIT_INTERVAL, Duration::from_secs(60)),
    removed: PollPolicy::new(WAIT_INTERVAL, Duration::from_secs(30)),
    settle: Duration::ZERO,
};

/// Name of the template container for `distro`/`release`.
#[must_use]
pub fn template_name(distro: &str, release: &str) -> String {
    format!("{distro}-{release}-v1")
}

/// [`Driver`] for local containers.
#[derive(Debug)]
pub struct ContainerDriver<R> {
    runtime: R,
    config: Arc<MistConfig>,
    readiness: ReadinessPlan,
}

impl ContainerDriver<LxcRuntime> {
    /// Wires the LXC runtime using real host processes.
    #[must_use]
    pub fn with_lxc(config: Arc<MistConfig>) -> Self {
        Self::new(LxcRuntime::default(), config)
    }
}

impl<R: ContainerRuntime> ContainerDriver<R> {
    /// Creates a driver around `runtime`.
    pub const fn new(runtime: R, config: Arc<MistConfig>) -> Self {
        Self {
            runtime,
            config,
            readiness: CONTAINER_READINESS,
        }
    }

    /// Overrides the readiness budgets.
    #[must_use]
    pub const fn with_readiness(mut self, readiness: ReadinessPlan) -> Self {
        self.readiness = readiness;
        self
    }

    /// Underlying container runtime.
    pub const fn runtime(&self) -> &R {
        &self.runtime
    }
}

impl<R: ContainerRuntime> Driver for ContainerDriver<R> {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn readiness(&self) -> ReadinessPlan {
        self.readiness
    }

    fn list_sources(&self) -> DriverFuture<'_, Vec<SourceImage>> {
        Box::pin(async move {
            let names = self.runtime.list().await?;
            Ok(names
                .into_iter()
                .map(|name| SourceImage {
                    identifier: name.clone(),
                    name,
                    deprecated: false,
                    size_gb: 0,
                })
                .collect())
        })
    }

    /// Prefers an existing template and otherwise names the one to build.
    fn resolve_source<'a>(
        &'a self,
        distro: &'a str,
        release: &'a str,
    ) -> DriverFuture<'a, SourceSpec> {
        Box::pin(async move {
            let sources = self.list_sources().await?;
            match resolver::resolve(distro, release, &sources) {
                Err(ProvisionError::ImageNotFound { .. }) => Ok(SourceSpec {
                    identifier: template_name(distro, release),
                    size_hint: 0,
                }),
                other => other,
            }
        })
    }

    fn create_backing_store<'a>(&'a self, plan: &'a BuildPlan) -> DriverFuture<'a, BackingStore> {
        Box::pin(async move {
            let name = plan.name.as_str();
            if self.runtime.exists(name).await? {
                return Err(ProvisionError::ResourceCreation {
                    name: name.to_owned(),
                    message: String::from("a container with this name already exists"),
                });
            }

            let template = plan.source.identifier.as_str();
            let backing_store = |err: ContainerRuntimeError| ProvisionError::BackingStore {
                name: name.to_owned(),
                message: err.to_string(),
            };
            if !self.runtime.exists(template).await? {
                tracing::info!(template, "template does not exist");
                self.runtime
                    .build_template(template, &plan.distro, &plan.release)
                    .await
                    .map_err(backing_store)?;
            }

            tracing::info!(name, template, "cloning template");
            self.runtime
                .clone_container(template, name)
                .await
                .map_err(backing_store)?;
            Ok(BackingStore {
                id: name.to_owned(),
            })
        })
    }

    fn is_backing_store_ready<'a>(&'a self, store: &'a BackingStore) -> DriverFuture<'a, bool> {
        Box::pin(async move { Ok(self.runtime.exists(&store.id).await?) })
    }

    fn discard_backing_store<'a>(&'a self, store: &'a BackingStore) -> DriverFuture<'a, ()> {
        Box::pin(async move { Ok(self.runtime.destroy(&store.id).await?) })
    }

    /// The clone already is the container; creation only hands out a handle.
    fn create_resource<'a>(
        &'a self,
        plan: &'a BuildPlan,
        store: &'a BackingStore,
    ) -> DriverFuture<'a, ResourceHandle> {
        let _ = plan;
        Box::pin(async move { Ok::<ResourceHandle, ProvisionError>(ResourceHandle::new(store.id.as_str())) })
    }

    fn start<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(name = %handle.name, "starting container");
            self.runtime
                .start(&handle.name)
                .await
                .map_err(|err| ProvisionError::ResourceCreation {
                    name: handle.name.clone(),
                    message: err.to_string(),
                })
        })
    }

    fn is_running<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            let state = self.runtime.state(&handle.name).await?;
            Ok(state == Some(ContainerState::Running))
        })
    }

    fn is_stopped<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            let state = self.runtime.state(&handle.name).await?;
            Ok(matches!(state, None | Some(ContainerState::Stopped)))
        })
    }

    fn network_addresses<'a>(
        &'a self,
        handle: &'a ResourceHandle,
    ) -> DriverFuture<'a, Vec<IpAddr>> {
        Box::pin(async move { Ok(self.runtime.ip_addresses(&handle.name).await?) })
    }

    fn prepare_service<'a>(
        &'a self,
        plan: &'a BuildPlan,
        handle: &'a ResourceHandle,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let env = vec![
                (String::from("MIST_USER"), self.config.username.clone()),
                (String::from("MIST_KEY"), plan.assets.public_key.clone()),
            ];
            self.runtime
                .run_script(&handle.name, &plan.assets.script, &env)
                .await
                .map_err(|err| ProvisionError::ResourceCreation {
                    name: handle.name.clone(),
                    message: format!("startup script failed: {err}"),
                })
        })
    }

    fn stop<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(name = %handle.name, "stopping container");
            Ok(self.runtime.stop(&handle.name).await?)
        })
    }

    fn destroy<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(name = %handle.name, "destroying container");
            Ok(self.runtime.destroy(&handle.name).await?)
        })
    }

    fn exists<'a>(&'a self, name: &'a str) -> DriverFuture<'a, bool> {
        Box::pin(async move { Ok(self.runtime.exists(name).await?) })
    }
}
