//! Request handler: the facade the RPC front end calls.
//!
//! Requests are defaulted from configuration, run through the
//! [`Provisioner`], and every outcome is mapped onto the wire result schema.
//! Nothing raised below this layer escapes it.

use rmpv::Value;
use tracing::{debug, error};

use crate::driver::Driver;
use crate::naming::{NameGenerator, RandomNames};
use crate::provision::{ProvisionRequest, Provisioner};
use crate::rpc::{RpcService, ServiceFuture};

/// Arguments accepted by `create` and `destroy`.
///
/// Empty strings and nil values count as absent.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequestArgs {
    /// Requested distribution.
    pub distro: Option<String>,
    /// Requested release.
    pub release: Option<String>,
    /// Requested or targeted resource name.
    pub name: Option<String>,
}

impl RequestArgs {
    /// Reads arguments from a string-keyed map.
    ///
    /// Integer values are accepted and rendered in decimal so callers may
    /// send `release: 18`. Unknown keys and non-map values are ignored.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let mut args = Self::default();
        let Value::Map(entries) = value else {
            return args;
        };
        for (key, raw) in entries {
            let text = match raw {
                Value::String(text) => text.as_str().map(str::to_owned),
                Value::Integer(number) => Some(number.to_string()),
                _ => None,
            }
            .filter(|text| !text.is_empty());
            match key.as_str() {
                Some("distro") => args.distro = text,
                Some("release") => args.release = text,
                Some("name") => args.name = text,
                _ => {}
            }
        }
        args
    }

    /// Encodes the arguments as a string-keyed map, omitting absent fields.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let entries = [
            ("distro", &self.distro),
            ("release", &self.release),
            ("name", &self.name),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_ref()
                .map(|text| (Value::from(key), Value::from(text.as_str())))
        })
        .collect();
        Value::Map(entries)
    }
}

/// Wire result of a `create` call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateResult {
    /// Whether the resource is ready.
    pub status: bool,
    /// Hostname of the worker that handled the call.
    pub server: String,
    /// Human readable outcome.
    pub message: String,
    /// Resource name on success.
    pub name: Option<String>,
    /// Address to connect to on success.
    pub ip: Option<String>,
    /// Operator account on success.
    pub username: Option<String>,
}

/// Wire result of a `destroy` call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DestroyResult {
    /// Whether the resource is gone.
    pub status: bool,
    /// Human readable outcome.
    pub message: String,
    /// Targeted resource name, kept on failure so callers can retry.
    pub name: Option<String>,
}

fn map_value(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(key, value)| (Value::from(key), value))
            .collect(),
    )
}

fn optional(entries: &mut Vec<(&str, Value)>, key: &'static str, value: Option<String>) {
    if let Some(text) = value {
        entries.push((key, Value::from(text)));
    }
}

impl From<CreateResult> for Value {
    fn from(result: CreateResult) -> Self {
        let mut entries = vec![
            ("status", Self::from(result.status)),
            ("server", Self::from(result.server)),
            ("message", Self::from(result.message)),
        ];
        optional(&mut entries, "name", result.name);
        optional(&mut entries, "ip", result.ip);
        optional(&mut entries, "username", result.username);
        map_value(entries)
    }
}

impl From<DestroyResult> for Value {
    fn from(result: DestroyResult) -> Self {
        let mut entries = vec![
            ("status", Self::from(result.status)),
            ("message", Self::from(result.message)),
        ];
        optional(&mut entries, "name", result.name);
        map_value(entries)
    }
}

/// Per-driver facade exposing `create` and `destroy`.
#[derive(Debug)]
pub struct RequestHandler<D, N = RandomNames> {
    provisioner: Provisioner<D, N>,
    server: String,
}

impl<D: Driver, N: NameGenerator> RequestHandler<D, N> {
    /// Wraps `provisioner`; `server` is reported in every create result.
    pub fn new(provisioner: Provisioner<D, N>, server: impl Into<String>) -> Self {
        Self {
            provisioner,
            server: server.into(),
        }
    }

    /// Provisions a resource, filling absent fields from configuration.
    pub async fn create(&self, args: RequestArgs) -> CreateResult {
        debug!(?args, "create request");
        let config = self.provisioner.config();
        let request = ProvisionRequest {
            distro: args
                .distro
                .unwrap_or_else(|| config.default_distro.clone()),
            release: args
                .release
                .unwrap_or_else(|| config.default_release.clone()),
            name: args.name,
        };

        match self.provisioner.create(&request).await {
            Ok(provisioned) => CreateResult {
                status: true,
                server: self.server.clone(),
                message: format!("created new {}", provisioned.kind.noun()),
                name: Some(provisioned.name),
                ip: Some(provisioned.ip.to_string()),
                username: Some(provisioned.username),
            },
            Err(failure) => {
                error!(
                    name = ?failure.name,
                    phase = ?failure.at,
                    error = %failure.cause,
                    "create request failed"
                );
                CreateResult {
                    status: false,
                    server: self.server.clone(),
                    message: format!("create request failed: {}", failure.cause),
                    name: None,
                    ip: None,
                    username: None,
                }
            }
        }
    }

    /// Destroys the named resource.
    pub async fn destroy(&self, args: RequestArgs) -> DestroyResult {
        debug!(?args, "destroy request");
        let Some(name) = args.name else {
            return DestroyResult {
                status: false,
                message: String::from("destroy request failed: missing required argument: name"),
                name: None,
            };
        };

        match self.provisioner.destroy(&name).await {
            Ok(()) => DestroyResult {
                status: true,
                message: format!("destroyed {}", self.provisioner.driver().kind().noun()),
                name: Some(name),
            },
            Err(err) => {
                error!(name = %name, error = %err, "destroy request failed");
                DestroyResult {
                    status: false,
                    message: format!("destroy request failed: {err}"),
                    name: Some(name),
                }
            }
        }
    }
}

impl<D, N> RpcService for RequestHandler<D, N>
where
    D: Driver + 'static,
    N: NameGenerator + 'static,
{
    fn call<'a>(&'a self, method: &'a str, params: &'a [Value]) -> ServiceFuture<'a> {
        let args = params
            .first()
            .map(RequestArgs::from_value)
            .unwrap_or_default();
        Box::pin(async move {
            match method {
                "create" => Ok(Value::from(self.create(args).await)),
                "destroy" => Ok(Value::from(self.destroy(args).await)),
                other => Err(Value::from(format!("unknown method: {other}"))),
            }
        })
    }
}
