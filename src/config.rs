//! Configuration loading via `ortho-config`.
//!
//! The worker reads its configuration once at startup. The resulting
//! [`MistConfig`] is immutable and handed explicitly to every component.

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::driver::BackendKind;

/// Base TCP port; worker `N` listens on `BASE_PORT + N`.
pub const BASE_PORT: u16 = 18_800;

/// Worker configuration derived from defaults, `mist.toml`, and `MIST_*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "MIST",
    discovery(
        app_name = "mist",
        env_var = "MIST_CONFIG_PATH",
        config_file_name = "mist.toml",
        dotfile_name = ".mist.toml",
        project_file_name = "mist.toml"
    )
)]
pub struct MistConfig {
    /// Distribution used when a request omits `distro`.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub default_distro: String,
    /// Release used when a request omits `release`.
    #[ortho_config(default = "18".to_owned())]
    pub default_release: String,
    /// Prefix for generated resource names.
    #[ortho_config(default = "mist".to_owned())]
    pub instance_name: String,
    /// Operator account created on every provisioned host.
    #[ortho_config(default = "mist".to_owned())]
    pub username: String,
    /// Path to the operator SSH public key injected into new hosts.
    #[ortho_config(default = "~/.ssh/id_rsa.pub".to_owned())]
    pub ssh_public_key: String,
    /// Path to the matching private key, recorded for operators.
    #[ortho_config(default = "~/.ssh/id_rsa".to_owned())]
    pub ssh_private_key: String,
    /// Root directory holding `gce/<distro>` and `lxc/<distro>` scripts.
    #[ortho_config(default = "/etc/mist/startup".to_owned())]
    pub startup_script_path: String,
    /// Google Cloud project owning new instances.
    pub gce_project: Option<String>,
    /// Static OAuth bearer token for the Compute Engine REST API. Tokens from
    /// `gcloud auth print-access-token` expire after about an hour, so
    /// long-lived workers should set `gce_access_token_file` instead.
    pub gce_access_token: Option<String>,
    /// File holding the bearer token, re-read before every API call so an
    /// external refresher can rotate it. Takes precedence over
    /// `gce_access_token`.
    pub gce_access_token_file: Option<String>,
    /// Comma separated public image projects searched after `gce_project`.
    #[ortho_config(default = "ubuntu-os-cloud,debian-cloud,centos-cloud".to_owned())]
    pub gce_image_projects: String,
    /// Compute Engine zone.
    #[ortho_config(default = "us-central1-a".to_owned())]
    pub zone: String,
    /// VPC network name.
    #[ortho_config(default = "default".to_owned())]
    pub network: String,
    /// Optional subnetwork name within `network`.
    pub subnet: Option<String>,
    /// Machine type for new instances.
    #[ortho_config(default = "n1-standard-1".to_owned())]
    pub machine_type: String,
    /// Whether callers receive the public (NAT) or the private address.
    #[ortho_config(default = true)]
    pub use_public_ip: bool,
    /// Address the RPC listener binds.
    #[ortho_config(default = "0.0.0.0".to_owned())]
    pub listen_address: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl MistConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to mist.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn require_optional(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        Self::require_field(value.unwrap_or_default(), metadata)
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("mist")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the fields every driver needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.default_distro,
            &FieldMetadata::new("default distribution", "MIST_DEFAULT_DISTRO", "default_distro"),
        )?;
        Self::require_field(
            &self.default_release,
            &FieldMetadata::new("default release", "MIST_DEFAULT_RELEASE", "default_release"),
        )?;
        Self::require_field(
            &self.instance_name,
            &FieldMetadata::new("instance base name", "MIST_INSTANCE_NAME", "instance_name"),
        )?;
        Self::require_field(
            &self.username,
            &FieldMetadata::new("operator username", "MIST_USERNAME", "username"),
        )?;
        Self::require_field(
            &self.ssh_public_key,
            &FieldMetadata::new("SSH public key path", "MIST_SSH_PUBLIC_KEY", "ssh_public_key"),
        )?;
        Self::require_field(
            &self.startup_script_path,
            &FieldMetadata::new(
                "startup script directory",
                "MIST_STARTUP_SCRIPT_PATH",
                "startup_script_path",
            ),
        )?;
        Self::require_field(
            &self.listen_address,
            &FieldMetadata::new("listen address", "MIST_LISTEN_ADDRESS", "listen_address"),
        )?;
        Ok(())
    }

    /// Validates the common fields plus those the selected driver needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate_for(&self, kind: BackendKind) -> Result<(), ConfigError> {
        self.validate()?;
        if kind == BackendKind::Container {
            return Ok(());
        }
        Self::require_optional(
            self.gce_project.as_deref(),
            &FieldMetadata::new("Google Cloud project", "MIST_GCE_PROJECT", "gce_project"),
        )?;
        if self.gce_access_token_path().is_none() {
            Self::require_optional(
                self.gce_access_token.as_deref(),
                &FieldMetadata::new(
                    "Compute Engine access token (or MIST_GCE_ACCESS_TOKEN_FILE)",
                    "MIST_GCE_ACCESS_TOKEN",
                    "gce_access_token",
                ),
            )?;
        }
        Self::require_field(&self.zone, &FieldMetadata::new("zone", "MIST_ZONE", "zone"))?;
        Self::require_field(
            &self.network,
            &FieldMetadata::new("network", "MIST_NETWORK", "network"),
        )?;
        Self::require_field(
            &self.machine_type,
            &FieldMetadata::new("machine type", "MIST_MACHINE_TYPE", "machine_type"),
        )?;
        Ok(())
    }

    /// Public image projects, in search order, with blanks removed.
    #[must_use]
    pub fn image_projects(&self) -> Vec<String> {
        self.gce_image_projects
            .split(',')
            .map(str::trim)
            .filter(|project| !project.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Location of the startup script for `distro` under the driver's
    /// subdirectory (`gce` or `lxc`).
    #[must_use]
    pub fn startup_script_for(&self, kind: BackendKind, distro: &str) -> Utf8PathBuf {
        Utf8Path::new(&expand_tilde(&self.startup_script_path))
            .join(kind.script_dir())
            .join(distro)
    }

    /// Expanded path of the rotating token file, when one is configured.
    #[must_use]
    pub fn gce_access_token_path(&self) -> Option<Utf8PathBuf> {
        self.gce_access_token_file
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(|path| Utf8PathBuf::from(expand_tilde(path)))
    }

    /// Expanded path of the operator public key.
    #[must_use]
    pub fn public_key_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(expand_tilde(&self.ssh_public_key))
    }
}

/// Expands a leading `~/` using `HOME`; other paths are returned unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) if !home.is_empty() => format!("{home}/{rest}"),
        _ => path.to_owned(),
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
