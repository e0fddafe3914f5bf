//! Loopback tests for the RPC server and client.

use std::sync::Arc;
use std::time::Duration;

use rmpv::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::*;

/// Echoes the first parameter; `slow` waits before answering.
struct Echo;

impl RpcService for Echo {
    fn call<'a>(&'a self, method: &'a str, params: &'a [Value]) -> ServiceFuture<'a> {
        Box::pin(async move {
            match method {
                "echo" => Ok(params.first().cloned().unwrap_or(Value::Nil)),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Value::from("slow done"))
                }
                other => Err(Value::from(format!("unknown method: {other}"))),
            }
        })
    }
}

async fn start() -> std::net::SocketAddr {
    let server = RpcServer::bind("127.0.0.1:0", Arc::new(Echo))
        .await
        .unwrap_or_else(|err| panic!("bind: {err}"));
    let address = server
        .local_addr()
        .unwrap_or_else(|err| panic!("address: {err}"));
    tokio::spawn(server.serve());
    address
}

async fn connect(address: std::net::SocketAddr) -> RpcClient {
    RpcClient::connect(address)
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"))
}

#[tokio::test]
async fn round_trips_a_call() {
    let mut client = connect(start().await).await;

    let reply = client
        .call("echo", Value::from("hello"))
        .await
        .unwrap_or_else(|err| panic!("call: {err}"));

    assert_eq!(reply, Value::from("hello"));
}

#[tokio::test]
async fn sequential_calls_share_a_connection() {
    let mut client = connect(start().await).await;

    for round in 0..3 {
        let reply = client
            .call("echo", Value::from(round))
            .await
            .unwrap_or_else(|err| panic!("call {round}: {err}"));
        assert_eq!(reply, Value::from(round));
    }
}

#[tokio::test]
async fn unknown_method_is_a_remote_error() {
    let mut client = connect(start().await).await;

    let err = client
        .call("reboot", Value::Nil)
        .await
        .expect_err("method does not exist");

    assert!(
        matches!(err, RpcError::Remote(ref message) if message == "unknown method: reboot"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn connections_are_served_concurrently() {
    let address = start().await;
    let mut slow = connect(address).await;
    let mut fast = connect(address).await;

    let slow_call = tokio::spawn(async move { slow.call("slow", Value::Nil).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let fast_reply = tokio::time::timeout(Duration::from_millis(150), fast.call("echo", Value::from(1)))
        .await
        .unwrap_or_else(|_| panic!("fast call was blocked by the slow one"))
        .unwrap_or_else(|err| panic!("fast call: {err}"));

    assert_eq!(fast_reply, Value::from(1));
    let slow_reply = slow_call
        .await
        .unwrap_or_else(|err| panic!("join: {err}"))
        .unwrap_or_else(|err| panic!("slow call: {err}"));
    assert_eq!(slow_reply, Value::from("slow done"));
}

#[tokio::test]
async fn malformed_request_gets_an_error_response() {
    let address = start().await;
    let mut stream = TcpStream::connect(address)
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));
    let bogus = Value::Array(vec![Value::from(0), Value::from(5), Value::from(1), Value::Nil]);
    let mut bytes = Vec::new();
    rmpv::encode::write_value(&mut bytes, &bogus).unwrap_or_else(|err| panic!("{err}"));
    stream
        .write_all(&bytes)
        .await
        .unwrap_or_else(|err| panic!("write: {err}"));

    let mut frames = FrameReader::default();
    let mut chunk = [0_u8; 512];
    let response = loop {
        if let Some(message) = frames.next_message().unwrap_or_else(|err| panic!("{err}")) {
            break message;
        }
        let read = stream
            .read(&mut chunk)
            .await
            .unwrap_or_else(|err| panic!("read: {err}"));
        assert!(read > 0, "server closed the connection");
        frames.extend(chunk.get(..read).unwrap_or_default());
    };

    let Message::Response { id, error, result } = response else {
        panic!("expected a response, got {response:?}");
    };
    assert_eq!(id, 5);
    assert_eq!(result, Value::Nil);
    assert_eq!(error, Value::from("malformed request: method must be a string"));
}
