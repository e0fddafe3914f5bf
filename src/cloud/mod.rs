//! Cloud VM driver backed by a compute API.
//!
//! A resource is a boot disk cloned from a public image plus an instance
//! booting from it. The disk is flagged for deletion with the instance, so
//! removing the instance releases everything.

mod api;
mod rest;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub use api::{
    ComputeApi, ComputeApiError, ComputeFuture, Disk, DiskSpec, Image, Instance, InstanceSpec,
};
pub use rest::GceRestApi;

use crate::config::{ConfigError, MistConfig};
use crate::driver::{
    BackendKind, BackingStore, BuildPlan, Driver, DriverFuture, PollPolicy, ReadinessPlan,
    ResourceHandle, SourceImage,
};
use crate::error::ProvisionError;

/// Readiness budgets for cloud instances.
pub const CLOUD_READINESS: ReadinessPlan =
    ReadinessPlan::uniform(PollPolicy::new(Duration::from_secs(5), Duration::from_secs(600)))
        .with_settle(Duration::from_secs(5));

/// Network tags applied to every instance.
pub const INSTANCE_TAGS: [&str; 2] = ["build", "build-host"];

const STATUS_READY: &str = "READY";
const STATUS_FAILED: &str = "FAILED";
const STATUS_RUNNING: &str = "RUNNING";
const STATUS_TERMINATED: &str = "TERMINATED";
const STATUS_STOPPED: &str = "STOPPED";

/// [`Driver`] for cloud virtual machines.
#[derive(Debug)]
pub struct CloudVmDriver<A> {
    api: A,
    config: Arc<MistConfig>,
    readiness: ReadinessPlan,
}

impl CloudVmDriver<GceRestApi> {
    /// Wires the REST binding from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when API credentials are absent.
    pub fn from_config(config: Arc<MistConfig>) -> Result<Self, ConfigError> {
        let api = GceRestApi::from_config(&config)?;
        Ok(Self::new(api, config))
    }
}

impl<A: ComputeApi> CloudVmDriver<A> {
    /// Creates a driver around `api`.
    pub const fn new(api: A, config: Arc<MistConfig>) -> Self {
        Self {
            api,
            config,
            readiness: CLOUD_READINESS,
        }
    }

    /// Overrides the readiness budgets.
    #[must_use]
    pub const fn with_readiness(mut self, readiness: ReadinessPlan) -> Self {
        self.readiness = readiness;
        self
    }

    /// Underlying compute binding.
    pub const fn api(&self) -> &A {
        &self.api
    }

    fn image_projects(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.config.gce_project.iter().cloned().collect();
        for project in self.config.image_projects() {
            if !projects.contains(&project) {
                projects.push(project);
            }
        }
        projects
    }

    fn instance_spec(&self, plan: &BuildPlan, store: &BackingStore) -> InstanceSpec {
        InstanceSpec {
            name: plan.name.clone(),
            disk: store.id.clone(),
            metadata: vec![
                (String::from("startup-script"), plan.assets.script.clone()),
                (String::from("mist-user"), self.config.username.clone()),
                (String::from("mist-key"), plan.assets.public_key.clone()),
            ],
            tags: INSTANCE_TAGS.iter().map(|tag| (*tag).to_owned()).collect(),
        }
    }

    fn select_address(&self, instance: &Instance) -> Option<IpAddr> {
        let address = if self.config.use_public_ip {
            instance.public_ip.as_deref()
        } else {
            instance.private_ip.as_deref()
        };
        address.and_then(|ip| ip.parse().ok())
    }
}

impl<A: ComputeApi> Driver for CloudVmDriver<A> {
    fn kind(&self) -> BackendKind {
        BackendKind::CloudVm
    }

    fn readiness(&self) -> ReadinessPlan {
        self.readiness
    }

    fn list_sources(&self) -> DriverFuture<'_, Vec<SourceImage>> {
        Box::pin(async move {
            let mut sources = Vec::new();
            for project in self.image_projects() {
                let images = self.api.list_images(&project).await?;
                sources.extend(images.into_iter().map(|image| SourceImage {
                    name: image.name,
                    identifier: image.self_link,
                    deprecated: image.deprecated,
                    size_gb: image.disk_size_gb,
                }));
            }
            Ok(sources)
        })
    }

    fn create_backing_store<'a>(&'a self, plan: &'a BuildPlan) -> DriverFuture<'a, BackingStore> {
        Box::pin(async move {
            tracing::info!(name = %plan.name, "creating disk");
            let spec = DiskSpec {
                name: plan.name.clone(),
                size_gb: plan.source.size_hint,
                source_image: plan.source.identifier.clone(),
            };
            self.api
                .insert_disk(&spec)
                .await
                .map_err(|err| ProvisionError::BackingStore {
                    name: plan.name.clone(),
                    message: err.to_string(),
                })?;
            Ok(BackingStore {
                id: plan.name.clone(),
            })
        })
    }

    fn is_backing_store_ready<'a>(&'a self, store: &'a BackingStore) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            match self.api.get_disk(&store.id).await? {
                Some(disk) if disk.status == STATUS_FAILED => Err(ProvisionError::BackingStore {
                    name: store.id.clone(),
                    message: String::from("disk creation failed"),
                }),
                Some(disk) => Ok(disk.status == STATUS_READY),
                None => Ok(false),
            }
        })
    }

    fn discard_backing_store<'a>(&'a self, store: &'a BackingStore) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(disk = %store.id, "deleting disk");
            Ok(self.api.delete_disk(&store.id).await?)
        })
    }

    fn create_resource<'a>(
        &'a self,
        plan: &'a BuildPlan,
        store: &'a BackingStore,
    ) -> DriverFuture<'a, ResourceHandle> {
        Box::pin(async move {
            tracing::info!(name = %plan.name, "creating instance");
            let spec = self.instance_spec(plan, store);
            self.api
                .insert_instance(&spec)
                .await
                .map_err(|err| ProvisionError::ResourceCreation {
                    name: plan.name.clone(),
                    message: err.to_string(),
                })?;
            Ok(ResourceHandle::new(plan.name.as_str()))
        })
    }

    /// Instances boot as part of creation, so there is nothing to do here.
    fn start<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, ()> {
        let _ = handle;
        Box::pin(async { Ok::<(), ProvisionError>(()) })
    }

    fn is_running<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            let instance = self.api.get_instance(&handle.name).await?;
            Ok(instance.is_some_and(|found| found.status == STATUS_RUNNING))
        })
    }

    fn is_stopped<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            let instance = self.api.get_instance(&handle.name).await?;
            Ok(instance.is_none_or(|found| {
                found.status == STATUS_TERMINATED || found.status == STATUS_STOPPED
            }))
        })
    }

    fn network_addresses<'a>(
        &'a self,
        handle: &'a ResourceHandle,
    ) -> DriverFuture<'a, Vec<IpAddr>> {
        Box::pin(async move {
            let instance = self.api.get_instance(&handle.name).await?;
            Ok(instance
                .and_then(|found| self.select_address(&found))
                .into_iter()
                .collect())
        })
    }

    fn stop<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(name = %handle.name, "stopping instance");
            Ok(self.api.stop_instance(&handle.name).await?)
        })
    }

    fn destroy<'a>(&'a self, handle: &'a ResourceHandle) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(name = %handle.name, "deleting instance");
            Ok(self.api.delete_instance(&handle.name).await?)
        })
    }

    fn exists<'a>(&'a self, name: &'a str) -> DriverFuture<'a, bool> {
        Box::pin(async move { Ok(self.api.get_instance(name).await?.is_some()) })
    }
}
