//! Core library for the `mist` provisioning worker.
//!
//! A worker hands out disposable build hosts (cloud VMs or local containers)
//! over MessagePack-RPC. The [`provision::Provisioner`] drives a [`Driver`]
//! through resolve, create, readiness, and rollback; the
//! [`handler::RequestHandler`] maps outcomes onto the wire schema.

pub mod assets;
pub mod cloud;
pub mod command;
pub mod config;
pub mod container;
pub mod driver;
pub mod error;
pub mod handler;
pub mod naming;
pub mod provision;
pub mod readiness;
pub mod resolver;
pub mod rpc;
pub mod test_support;

pub use cloud::{CloudVmDriver, ComputeApi, GceRestApi};
pub use config::{BASE_PORT, ConfigError, MistConfig};
pub use container::{ContainerDriver, ContainerRuntime, LxcRuntime};
pub use driver::{BackendKind, Driver};
pub use error::ProvisionError;
pub use handler::{CreateResult, DestroyResult, RequestArgs, RequestHandler};
pub use naming::{NameGenerator, RandomNames};
pub use provision::{Phase, ProvisionFailure, ProvisionRequest, Provisioned, Provisioner};
pub use rpc::{RpcClient, RpcError, RpcServer, RpcService};
