//! Error taxonomy shared by the resolver, drivers, and provisioning engine.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while provisioning or tearing down a resource.
///
/// Every variant renders a complete human readable message because the
/// request handler forwards `to_string()` verbatim as the wire `message`.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when a request field could escape a path or name a foreign
    /// resource.
    #[error(
        "invalid {field} {value:?}: use letters, digits, '.', '_' or '-', starting with a letter or digit"
    )]
    InvalidArgument {
        /// Request field that was rejected.
        field: String,
        /// Value supplied by the caller.
        value: String,
    },
    /// Raised when no image or template matches the requested distribution.
    #[error("could not find suitable source image for {distro}:{release}")]
    ImageNotFound {
        /// Distribution requested by the caller.
        distro: String,
        /// Release requested by the caller.
        release: String,
    },
    /// Raised when the disk or template clone cannot be created.
    #[error("failed to create backing store {name}: {message}")]
    BackingStore {
        /// Resource name the backing store belongs to.
        name: String,
        /// Provider supplied detail.
        message: String,
    },
    /// Raised when the instance or container cannot be created or started.
    #[error("failed to create resource {name}: {message}")]
    ResourceCreation {
        /// Resource name.
        name: String,
        /// Provider supplied detail.
        message: String,
    },
    /// Raised when a readiness wait exceeds its budget.
    #[error("timed out waiting for {stage} on {name} after {after:?}")]
    Timeout {
        /// Readiness stage being waited on (for example `network`).
        stage: String,
        /// Resource name.
        name: String,
        /// Budget that elapsed.
        after: Duration,
    },
    /// Raised when a destroy target does not exist.
    #[error("resource {name} does not exist")]
    NotFound {
        /// Requested resource name.
        name: String,
    },
    /// Raised when stopping or removing a resource fails.
    #[error("failed to tear down {name}: {message}")]
    Teardown {
        /// Resource name.
        name: String,
        /// Provider supplied detail.
        message: String,
    },
    /// Raised when a startup script or SSH key cannot be read.
    #[error("failed to read {path}: {message}")]
    Asset {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        message: String,
    },
    /// Raised when worker configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
    /// Wrapper for any other backend failure.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the backend binding.
        message: String,
    },
}

impl ProvisionError {
    /// Wraps an arbitrary backend failure.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Returns `true` when the error reports an elapsed readiness budget.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<ConfigError> for ProvisionError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
