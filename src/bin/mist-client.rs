//! Command-line client for a `mist` worker.
//!
//! Sends one `create` or `destroy` call and prints the reply as JSON.

use clap::{Parser, Subcommand};
use mist::{RequestArgs, RpcClient};
use rmpv::Value;
use serde_json::{Map, Number, Value as Json};
use std::io::Write as _;

#[derive(Debug, Parser)]
#[command(
    name = "mist-client",
    about = "Ask a mist worker to create or destroy a build host"
)]
struct Cli {
    /// Worker address as `host:port`.
    #[arg(long, env = "MIST_ADDRESS", default_value = "127.0.0.1:18800")]
    address: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provision a new resource.
    Create {
        /// Distribution to boot; the worker default applies when omitted.
        #[arg(long)]
        distro: Option<String>,
        /// Release of the distribution.
        #[arg(long)]
        release: Option<String>,
        /// Explicit resource name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Tear down an existing resource.
    Destroy {
        /// Name of the resource to remove.
        #[arg(long)]
        name: String,
    },
}

impl Command {
    fn into_call(self) -> (&'static str, RequestArgs) {
        match self {
            Self::Create {
                distro,
                release,
                name,
            } => (
                "create",
                RequestArgs {
                    distro,
                    release,
                    name,
                },
            ),
            Self::Destroy { name } => (
                "destroy",
                RequestArgs {
                    name: Some(name),
                    ..RequestArgs::default()
                },
            ),
        }
    }
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Nil => Json::Null,
        Value::Boolean(flag) => Json::Bool(*flag),
        Value::Integer(int) => int
            .as_i64()
            .map(Number::from)
            .or_else(|| int.as_u64().map(Number::from))
            .map_or(Json::Null, Json::Number),
        Value::F32(float) => Number::from_f64(f64::from(*float)).map_or(Json::Null, Json::Number),
        Value::F64(float) => Number::from_f64(*float).map_or(Json::Null, Json::Number),
        Value::String(text) => Json::String(text.as_str().unwrap_or_default().to_owned()),
        Value::Binary(bytes) | Value::Ext(_, bytes) => {
            Json::Array(bytes.iter().map(|byte| Json::from(*byte)).collect())
        }
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(key, item)| {
                    let label = key
                        .as_str()
                        .map_or_else(|| key.to_string(), ToOwned::to_owned);
                    (label, to_json(item))
                })
                .collect::<Map<_, _>>(),
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    let (method, args) = cli.command.into_call();

    let mut client = RpcClient::connect(cli.address.as_str())
        .await
        .map_err(|err| err.to_string())?;
    let reply = client
        .call(method, args.to_value())
        .await
        .map_err(|err| err.to_string())?;

    let rendered = serde_json::to_string_pretty(&to_json(&reply)).map_err(|err| err.to_string())?;
    writeln!(std::io::stdout(), "{rendered}").map_err(|err| err.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_only_sends_the_name() {
        let (method, args) = Command::Destroy {
            name: String::from("mist-a"),
        }
        .into_call();
        assert_eq!(method, "destroy");
        assert_eq!(args.name.as_deref(), Some("mist-a"));
        assert_eq!(args.distro, None);
    }

    #[test]
    fn replies_render_as_json_objects() {
        let reply = Value::Map(vec![
            (Value::from("status"), Value::from(true)),
            (Value::from("ip"), Value::from("10.0.0.4")),
            (Value::from("code"), Value::from(7)),
        ]);
        assert_eq!(
            to_json(&reply),
            serde_json::json!({"status": true, "ip": "10.0.0.4", "code": 7})
        );
    }
}
