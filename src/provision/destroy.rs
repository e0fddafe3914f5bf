//! Destroy workflow.

use tracing::{error, info};

use super::{check_component, DestroyPhase, Provisioner};
use crate::driver::{Driver, ResourceHandle};
use crate::error::ProvisionError;
use crate::naming::NameGenerator;
use crate::readiness::wait_until;

impl<D: Driver, N: NameGenerator> Provisioner<D, N> {
    /// Stops and removes the resource called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidArgument`] for a malformed name,
    /// [`ProvisionError::NotFound`] without touching anything when
    /// the resource does not exist, and [`ProvisionError::Teardown`] when a
    /// later step fails.
    pub async fn destroy(&self, name: &str) -> Result<(), ProvisionError> {
        check_component("name", name)?;
        if !self.driver.exists(name).await? {
            return Err(ProvisionError::NotFound {
                name: name.to_owned(),
            });
        }

        let handle = ResourceHandle::new(name);
        let mut phase = DestroyPhase::Existing;
        match self.tear_down(&handle, &mut phase).await {
            Ok(()) => {
                info!(name, "resource destroyed");
                Ok(())
            }
            Err(err) => {
                error!(name, ?phase, error = %err, "destroy failed");
                Err(ProvisionError::Teardown {
                    name: name.to_owned(),
                    message: err.to_string(),
                })
            }
        }
    }

    async fn tear_down(
        &self,
        handle: &ResourceHandle,
        phase: &mut DestroyPhase,
    ) -> Result<(), ProvisionError> {
        let driver = &self.driver;
        let readiness = driver.readiness();
        let name = handle.name.as_str();

        *phase = DestroyPhase::Stopping;
        if driver.is_running(handle).await? {
            info!(name, "stopping resource");
            driver.stop(handle).await?;
        }
        wait_until(readiness.stopped, move || driver.is_stopped(handle))
            .await
            .map_err(|err| err.into_provision_error("stopped state", name))?;
        *phase = DestroyPhase::Stopped;

        driver.destroy(handle).await?;
        wait_until(readiness.removed, move || async move {
            driver.exists(name).await.map(|present| !present)
        })
        .await
        .map_err(|err| err.into_provision_error("removal", name))?;
        *phase = DestroyPhase::Removed;
        Ok(())
    }
}
