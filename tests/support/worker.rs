//! Helpers for standing up an in-process worker over loopback RPC.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use mist::driver::{PollPolicy, ReadinessPlan};
use mist::test_support::write_assets;
use mist::{Driver, MistConfig, NameGenerator, RequestHandler, RpcClient, RpcServer};
use rmpv::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Readiness plan short enough for timeouts to surface quickly.
pub const FAST: ReadinessPlan = ReadinessPlan::uniform(PollPolicy::new(
    Duration::from_millis(10),
    Duration::from_millis(300),
));

/// Startup assets on disk plus a listener standing in for every host's SSH
/// port.
pub struct Workspace {
    _assets: TempDir,
    _listener: TcpListener,
    /// Configuration pointing at the written assets.
    pub config: Arc<MistConfig>,
    /// Port the service readiness probe connects to.
    pub service_port: u16,
}

/// Writes assets for `ubuntu` and binds the stand-in service listener.
pub async fn workspace() -> Workspace {
    let assets = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(assets.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()));
    let mut config =
        write_assets(&root, &["ubuntu"]).unwrap_or_else(|err| panic!("write assets: {err}"));
    config.gce_project = Some(String::from("builds"));

    let listener = TcpListener::bind("0.0.0.0:0")
        .await
        .unwrap_or_else(|err| panic!("bind service listener: {err}"));
    let service_port = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("listener address: {err}"))
        .port();

    Workspace {
        _assets: assets,
        _listener: listener,
        config: Arc::new(config),
        service_port,
    }
}

/// Serves `handler` on an ephemeral loopback port and returns the address.
pub async fn spawn_worker<D, N>(handler: RequestHandler<D, N>) -> SocketAddr
where
    D: Driver + 'static,
    N: NameGenerator + 'static,
{
    let server = RpcServer::bind("127.0.0.1:0", Arc::new(handler))
        .await
        .unwrap_or_else(|err| panic!("bind worker: {err}"));
    let address = server
        .local_addr()
        .unwrap_or_else(|err| panic!("worker address: {err}"));
    tokio::spawn(server.serve());
    address
}

/// Performs one call on a fresh connection.
pub async fn call(address: SocketAddr, method: &str, args: Value) -> Value {
    let mut client = RpcClient::connect(address)
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));
    client
        .call(method, args)
        .await
        .unwrap_or_else(|err| panic!("{method} call: {err}"))
}

/// Looks up `key` in a result map.
pub fn field<'v>(result: &'v Value, key: &str) -> Option<&'v Value> {
    result
        .as_map()?
        .iter()
        .find(|(candidate, _)| candidate.as_str() == Some(key))
        .map(|(_, value)| value)
}

/// Reads a string field, panicking when it is absent.
pub fn text<'v>(result: &'v Value, key: &str) -> &'v str {
    field(result, key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field {key} in {result}"))
}

/// Reads the `status` flag.
pub fn status(result: &Value) -> bool {
    field(result, "status")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| panic!("missing status in {result}"))
}

/// Builds a string-keyed argument map.
pub fn args(pairs: &[(&str, &str)]) -> Value {
    Value::Map(
        pairs
            .iter()
            .map(|(key, value)| (Value::from(*key), Value::from(*value)))
            .collect(),
    )
}
