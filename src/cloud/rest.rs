//! Compute Engine REST binding.

use std::sync::LazyLock;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use super::api::{
    ComputeApi, ComputeApiError, ComputeFuture, Disk, DiskSpec, Image, Instance, InstanceSpec,
};
use crate::assets::read_ambient;
use crate::config::{ConfigError, MistConfig};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Source of the bearer token sent with every request.
#[derive(Clone, Debug, Eq, PartialEq)]
enum AccessToken {
    Static(String),
    /// Re-read per request so an external refresher can rotate it.
    File(Utf8PathBuf),
}

impl AccessToken {
    fn current(&self) -> Result<String, ComputeApiError> {
        let path = match self {
            Self::Static(token) => return Ok(token.clone()),
            Self::File(path) => path,
        };
        let contents = read_ambient(path).map_err(|err| ComputeApiError::Credentials {
            message: format!("{path}: {err}"),
        })?;
        let token = contents.trim();
        if token.is_empty() {
            return Err(ComputeApiError::Credentials {
                message: format!("{path} is empty"),
            });
        }
        Ok(token.to_owned())
    }
}

/// [`ComputeApi`] implementation speaking to the Compute Engine v1 API.
#[derive(Clone, Debug)]
pub struct GceRestApi {
    project: String,
    zone: String,
    network: String,
    subnet: Option<String>,
    machine_type: String,
    access_token: AccessToken,
    base_url: String,
}

impl GceRestApi {
    /// Builds a binding from worker configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the project is not
    /// configured, or when neither a token file nor a static token is.
    pub fn from_config(config: &MistConfig) -> Result<Self, ConfigError> {
        let required = |value: &Option<String>, field: &str| {
            value
                .as_deref()
                .filter(|candidate| !candidate.trim().is_empty())
                .map(str::to_owned)
                .ok_or_else(|| ConfigError::MissingField(field.to_owned()))
        };

        let project = required(&config.gce_project, "gce_project")?;
        let access_token = match config.gce_access_token_path() {
            Some(path) => AccessToken::File(path),
            None => AccessToken::Static(required(&config.gce_access_token, "gce_access_token")?),
        };

        Ok(Self {
            project,
            zone: config.zone.clone(),
            network: config.network.clone(),
            subnet: config.subnet.clone(),
            machine_type: config.machine_type.clone(),
            access_token,
            base_url: COMPUTE_API_BASE.to_owned(),
        })
    }

    /// Points the binding at a different API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Project the binding creates resources in.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    fn zonal_url(&self, collection: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/{collection}",
            self.base_url, self.project, self.zone
        )
    }

    fn region(&self) -> &str {
        self.zone
            .rsplit_once('-')
            .map_or(self.zone.as_str(), |(region, _)| region)
    }

    fn instance_body(&self, spec: &InstanceSpec) -> InstanceBody {
        InstanceBody {
            name: spec.name.clone(),
            machine_type: format!("zones/{}/machineTypes/{}", self.zone, self.machine_type),
            disks: vec![AttachedDisk {
                boot: true,
                auto_delete: true,
                source: format!(
                    "projects/{}/zones/{}/disks/{}",
                    self.project, self.zone, spec.disk
                ),
            }],
            network_interfaces: vec![NetworkInterfaceBody {
                network: format!("global/networks/{}", self.network),
                subnetwork: self
                    .subnet
                    .as_ref()
                    .map(|subnet| format!("regions/{}/subnetworks/{subnet}", self.region())),
                access_configs: vec![AccessConfigBody {
                    kind: "ONE_TO_ONE_NAT",
                    name: "External NAT",
                }],
            }],
            metadata: MetadataBody {
                items: spec
                    .metadata
                    .iter()
                    .map(|(key, value)| MetadataItem {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            },
            tags: TagsBody {
                items: spec.tags.clone(),
            },
        }
    }

    /// Sends `request`, mapping 404 to `None` and other failures to errors.
    async fn send(&self, request: RequestBuilder) -> Result<Option<String>, ComputeApiError> {
        let response = request
            .bearer_auth(self.access_token.current()?)
            .send()
            .await
            .map_err(|err| ComputeApiError::Transport {
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ComputeApiError::Transport {
                message: err.to_string(),
            })?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_success() {
            return Ok(Some(body));
        }
        Err(ComputeApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Like [`Self::send`] but treats a missing resource as an error.
    async fn send_expecting(&self, request: RequestBuilder) -> Result<String, ComputeApiError> {
        self.send(request)
            .await?
            .ok_or_else(|| ComputeApiError::Status {
                status: StatusCode::NOT_FOUND.as_u16(),
                body: String::from("resource not found"),
            })
    }
}

fn decode<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, ComputeApiError> {
    serde_json::from_str(body).map_err(|err| ComputeApiError::Decode {
        message: err.to_string(),
    })
}

impl ComputeApi for GceRestApi {
    fn list_images<'a>(&'a self, project: &'a str) -> ComputeFuture<'a, Vec<Image>> {
        Box::pin(async move {
            let url = format!("{}/projects/{project}/global/images", self.base_url);
            let mut images = Vec::new();
            let mut page_token: Option<String> = None;
            loop {
                let mut request = HTTP_CLIENT.get(&url);
                if let Some(token) = &page_token {
                    request = request.query(&[("pageToken", token)]);
                }
                let Some(body) = self.send(request).await? else {
                    break;
                };
                let page: ImageList = decode(&body)?;
                images.extend(page.items.into_iter().map(Image::from));
                match page.next_page_token {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }
            tracing::debug!(project, count = images.len(), "listed images");
            Ok(images)
        })
    }

    fn insert_disk<'a>(&'a self, spec: &'a DiskSpec) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let payload = DiskBody {
                name: spec.name.clone(),
                size_gb: spec.size_gb.to_string(),
                source_image: spec.source_image.clone(),
            };
            self.send_expecting(HTTP_CLIENT.post(self.zonal_url("disks")).json(&payload))
                .await
                .map(drop)
        })
    }

    fn get_disk<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, Option<Disk>> {
        Box::pin(async move {
            let url = format!("{}/{name}", self.zonal_url("disks"));
            let Some(body) = self.send(HTTP_CLIENT.get(url)).await? else {
                return Ok(None);
            };
            let disk: DiskResource = decode(&body)?;
            Ok(Some(Disk {
                status: disk.status,
            }))
        })
    }

    fn delete_disk<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/{name}", self.zonal_url("disks"));
            self.send(HTTP_CLIENT.delete(url)).await.map(drop)
        })
    }

    fn insert_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let payload = self.instance_body(spec);
            self.send_expecting(HTTP_CLIENT.post(self.zonal_url("instances")).json(&payload))
                .await
                .map(drop)
        })
    }

    fn get_instance<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, Option<Instance>> {
        Box::pin(async move {
            let url = format!("{}/{name}", self.zonal_url("instances"));
            let Some(body) = self.send(HTTP_CLIENT.get(url)).await? else {
                return Ok(None);
            };
            let instance: InstanceResource = decode(&body)?;
            Ok(Some(Instance::from(instance)))
        })
    }

    fn stop_instance<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/{name}/stop", self.zonal_url("instances"));
            self.send_expecting(HTTP_CLIENT.post(url)).await.map(drop)
        })
    }

    fn delete_instance<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/{name}", self.zonal_url("instances"));
            self.send(HTTP_CLIENT.delete(url)).await.map(drop)
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageList {
    #[serde(default)]
    items: Vec<ImageResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResource {
    name: String,
    self_link: String,
    disk_size_gb: Option<String>,
    deprecated: Option<Deprecation>,
}

#[derive(Debug, Deserialize)]
struct Deprecation {
    state: Option<String>,
}

impl From<ImageResource> for Image {
    fn from(value: ImageResource) -> Self {
        let deprecated = value
            .deprecated
            .and_then(|deprecation| deprecation.state)
            .is_some_and(|state| state != "ACTIVE");
        Self {
            name: value.name,
            self_link: value.self_link,
            deprecated,
            disk_size_gb: value
                .disk_size_gb
                .and_then(|size| size.parse().ok())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiskResource {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceResource {
    status: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterfaceResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterfaceResource {
    #[serde(rename = "networkIP")]
    network_ip: Option<String>,
    #[serde(default)]
    access_configs: Vec<AccessConfigResource>,
}

#[derive(Debug, Deserialize)]
struct AccessConfigResource {
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

impl From<InstanceResource> for Instance {
    fn from(value: InstanceResource) -> Self {
        let primary = value.network_interfaces.into_iter().next();
        let private_ip = primary
            .as_ref()
            .and_then(|interface| interface.network_ip.clone());
        let public_ip = primary.and_then(|interface| {
            interface
                .access_configs
                .into_iter()
                .find_map(|config| config.nat_ip)
        });
        Self {
            status: value.status,
            public_ip,
            private_ip,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiskBody {
    name: String,
    size_gb: String,
    source_image: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceBody {
    name: String,
    machine_type: String,
    disks: Vec<AttachedDisk>,
    network_interfaces: Vec<NetworkInterfaceBody>,
    metadata: MetadataBody,
    tags: TagsBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachedDisk {
    boot: bool,
    auto_delete: bool,
    source: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterfaceBody {
    network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subnetwork: Option<String>,
    access_configs: Vec<AccessConfigBody>,
}

#[derive(Debug, Serialize)]
struct AccessConfigBody {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'static str,
}

#[derive(Debug, Serialize)]
struct MetadataBody {
    items: Vec<MetadataItem>,
}

#[derive(Debug, Serialize)]
struct MetadataItem {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct TagsBody {
    items: Vec<String>,
}
