//! Narrow view of the compute API the cloud driver consumes.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::error::ProvisionError;

/// Future returned by [`ComputeApi`] calls.
pub type ComputeFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ComputeApiError>> + Send + 'a>>;

/// Errors raised by compute API bindings.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComputeApiError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("compute request failed: {message}")]
    Transport {
        /// Underlying transport error.
        message: String,
    },
    /// The API answered with a non-success status.
    #[error("compute API returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, usually a JSON error document.
        body: String,
    },
    /// No usable bearer token could be obtained.
    #[error("compute credentials unavailable: {message}")]
    Credentials {
        /// Why the token could not be read.
        message: String,
    },
    /// The response body did not match the expected shape.
    #[error("unexpected compute response: {message}")]
    Decode {
        /// Deserialisation error.
        message: String,
    },
}

impl From<ComputeApiError> for ProvisionError {
    fn from(value: ComputeApiError) -> Self {
        Self::provider(value.to_string())
    }
}

/// A machine image as listed by the compute API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Image {
    /// Short image name.
    pub name: String,
    /// Fully qualified link usable as a disk source.
    pub self_link: String,
    /// Whether the image carries a non-active deprecation state.
    pub deprecated: bool,
    /// Minimum disk size in GB.
    pub disk_size_gb: u64,
}

/// Parameters for a new boot disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiskSpec {
    /// Disk name, equal to the instance name.
    pub name: String,
    /// Size in GB.
    pub size_gb: u64,
    /// Image link the disk is cloned from.
    pub source_image: String,
}

/// Observed state of a disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Disk {
    /// Provider status string such as `CREATING` or `READY`.
    pub status: String,
}

/// Parameters for a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Instance name.
    pub name: String,
    /// Name of the boot disk to attach.
    pub disk: String,
    /// Key/value pairs exposed through the metadata service.
    pub metadata: Vec<(String, String)>,
    /// Network tags.
    pub tags: Vec<String>,
}

/// Observed state of an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Provider status string such as `RUNNING` or `TERMINATED`.
    pub status: String,
    /// External NAT address, when assigned.
    pub public_ip: Option<String>,
    /// Address on the VPC network, when assigned.
    pub private_ip: Option<String>,
}

/// Compute operations used by [`super::CloudVmDriver`].
///
/// Zone, network, and machine type are properties of the binding, not of
/// each call. Lookups return `None` for resources that do not exist.
pub trait ComputeApi: Send + Sync {
    /// Lists images owned by `project`, following pagination.
    fn list_images<'a>(&'a self, project: &'a str) -> ComputeFuture<'a, Vec<Image>>;

    /// Starts creating a disk.
    fn insert_disk<'a>(&'a self, spec: &'a DiskSpec) -> ComputeFuture<'a, ()>;

    /// Looks up a disk by name.
    fn get_disk<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, Option<Disk>>;

    /// Starts deleting a disk.
    fn delete_disk<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, ()>;

    /// Starts creating an instance; the boot disk is deleted with it.
    fn insert_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ComputeFuture<'a, ()>;

    /// Looks up an instance by name.
    fn get_instance<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, Option<Instance>>;

    /// Requests a shutdown.
    fn stop_instance<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, ()>;

    /// Starts deleting an instance.
    fn delete_instance<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, ()>;
}
