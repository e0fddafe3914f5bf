//! Create workflow and rollback.

use std::net::{IpAddr, SocketAddr};

use tokio::time::sleep;
use tracing::{error, info, warn};

use super::{Phase, ProvisionFailure, ProvisionRequest, Provisioned, ProvisionedResource, Provisioner};
use crate::assets::StartupAssets;
use crate::driver::{BuildPlan, Driver};
use crate::error::ProvisionError;
use crate::naming::NameGenerator;
use crate::readiness::{wait_for, wait_for_service, wait_until};

impl<D: Driver, N: NameGenerator> Provisioner<D, N> {
    /// Builds a resource and waits until its service port answers.
    ///
    /// Nothing is mutated when resolution or asset loading fails. Any later
    /// failure triggers a single best-effort rollback of what was built.
    ///
    /// # Errors
    ///
    /// Returns a [`ProvisionFailure`] carrying the original error and the
    /// last phase reached.
    pub async fn create(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionFailure> {
        let kind = self.driver.kind();
        let not_started = |cause: ProvisionError| ProvisionFailure {
            name: request.name.clone(),
            at: Phase::Requested,
            cause,
        };

        request.validate().map_err(not_started)?;
        let source = self
            .driver
            .resolve_source(&request.distro, &request.release)
            .await
            .map_err(not_started)?;
        let assets = StartupAssets::load(&self.config, kind, &request.distro).map_err(not_started)?;
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| self.names.generate(&self.config.instance_name));

        let plan = BuildPlan {
            name,
            distro: request.distro.clone(),
            release: request.release.clone(),
            source,
            assets,
        };
        let mut resource = ProvisionedResource::new(plan.name.clone(), kind);

        match self.build(&plan, &mut resource).await {
            Ok(ip) => {
                resource.advance(Phase::Done);
                info!(name = %plan.name, %ip, "resource ready");
                Ok(Provisioned {
                    name: plan.name,
                    ip,
                    username: self.config.username.clone(),
                    kind,
                })
            }
            Err(cause) => {
                error!(
                    name = %plan.name,
                    phase = ?resource.phase(),
                    error = %cause,
                    "create failed; rolling back"
                );
                self.roll_back(&resource).await;
                Err(ProvisionFailure {
                    name: Some(plan.name),
                    at: resource.phase(),
                    cause,
                })
            }
        }
    }

    async fn build(
        &self,
        plan: &BuildPlan,
        resource: &mut ProvisionedResource,
    ) -> Result<IpAddr, ProvisionError> {
        let driver = &self.driver;
        let readiness = driver.readiness();
        let name = plan.name.as_str();

        info!(name, source = %plan.source.identifier, "creating backing store");
        let store = driver.create_backing_store(plan).await?;
        resource.backing_store = Some(store.clone());
        let store_ref = &store;
        wait_until(readiness.backing_store, move || {
            driver.is_backing_store_ready(store_ref)
        })
        .await
        .map_err(|err| err.into_provision_error("backing store", name))?;
        resource.advance(Phase::BackingStoreReady);

        let handle = driver.create_resource(plan, &store).await?;
        resource.handle = Some(handle.clone());
        driver.start(&handle).await?;
        let handle_ref = &handle;
        wait_until(readiness.running, move || driver.is_running(handle_ref))
            .await
            .map_err(|err| err.into_provision_error("running state", name))?;
        resource.advance(Phase::Running);

        let ip = wait_for(readiness.network, move || async move {
            let addresses = driver.network_addresses(handle_ref).await?;
            Ok::<Option<IpAddr>, ProvisionError>(addresses.into_iter().next())
        })
        .await
        .map_err(|err| err.into_provision_error("network", name))?;
        resource.network_address = Some(ip);
        resource.advance(Phase::NetworkReady);

        driver.prepare_service(plan, &handle).await?;
        wait_for_service(SocketAddr::new(ip, self.service_port), readiness.service)
            .await
            .map_err(|err| err.into_provision_error("service", name))?;
        resource.advance(Phase::ServiceReady);

        if !readiness.settle.is_zero() {
            sleep(readiness.settle).await;
        }
        Ok(ip)
    }

    /// Stops and removes whatever `resource` got as far as creating.
    ///
    /// Errors are logged and swallowed so the caller keeps the original cause.
    async fn roll_back(&self, resource: &ProvisionedResource) {
        let driver = &self.driver;
        let name = resource.name.as_str();

        let Some(handle) = &resource.handle else {
            self.discard_store(resource).await;
            return;
        };

        match driver.is_running(handle).await {
            Ok(true) => {
                if let Err(err) = driver.stop(handle).await {
                    warn!(name, error = %err, "rollback could not stop resource");
                }
            }
            Ok(false) => {}
            Err(err) => warn!(name, error = %err, "rollback could not query state"),
        }

        match driver.exists(name).await {
            Ok(true) => {
                if let Err(err) = driver.destroy(handle).await {
                    warn!(name, error = %err, "rollback could not remove resource");
                }
            }
            // Accepted but never materialised: the store is all that is left.
            Ok(false) => self.discard_store(resource).await,
            Err(err) => warn!(name, error = %err, "rollback could not check existence"),
        }
    }

    async fn discard_store(&self, resource: &ProvisionedResource) {
        if let Some(store) = &resource.backing_store {
            if let Err(err) = self.driver.discard_backing_store(store).await {
                warn!(
                    name = %resource.name,
                    error = %err,
                    "rollback could not discard backing store"
                );
            }
        }
    }
}
