//! TCP listener dispatching requests to an [`RpcService`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rmpv::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use super::codec::{CodecError, FrameReader, Message};
use super::{RpcError, RpcService};

const READ_CHUNK: usize = 8 * 1024;

/// Accepts connections and serves each one on its own task.
///
/// Requests on one connection are answered in order; connections are
/// independent of each other.
#[derive(Debug)]
pub struct RpcServer<S> {
    listener: TcpListener,
    service: Arc<S>,
}

impl<S: RpcService> RpcServer<S> {
    /// Binds `address`.
    ///
    /// # Errors
    ///
    /// Returns the socket error when the address cannot be bound.
    pub async fn bind(address: impl ToSocketAddrs, service: Arc<S>) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener, service })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until accepting fails.
    ///
    /// # Errors
    ///
    /// Returns the error raised by `accept`.
    pub async fn serve(self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!(%peer, "accepted connection");
            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                match serve_connection(stream, service).await {
                    Ok(()) => debug!(%peer, "connection closed"),
                    Err(err) => warn!(%peer, error = %err, "connection aborted"),
                }
            });
        }
    }
}

async fn send(stream: &mut TcpStream, message: Message) -> Result<(), RpcError> {
    let frame = message.encode()?;
    stream.write_all(&frame).await?;
    Ok(())
}

async fn serve_connection<S: RpcService>(
    mut stream: TcpStream,
    service: Arc<S>,
) -> Result<(), RpcError> {
    let mut frames = FrameReader::default();
    let mut chunk = vec![0_u8; READ_CHUNK];
    loop {
        loop {
            match frames.next_message() {
                Ok(Some(Message::Request { id, method, params })) => {
                    info!(id, method = %method, "rpc request");
                    let (error, result) = match service.call(&method, &params).await {
                        Ok(result) => (Value::Nil, result),
                        Err(error) => (error, Value::Nil),
                    };
                    send(&mut stream, Message::Response { id, error, result }).await?;
                }
                Ok(Some(Message::Notification { method, .. })) => {
                    debug!(method = %method, "ignoring notification");
                }
                Ok(Some(Message::Response { id, .. })) => {
                    warn!(id, "ignoring unsolicited response");
                }
                Ok(None) => break,
                Err(CodecError::Malformed {
                    id: Some(id),
                    reason,
                }) => {
                    warn!(id, reason = %reason, "malformed request");
                    let error = Value::from(format!("malformed request: {reason}"));
                    send(
                        &mut stream,
                        Message::Response {
                            id,
                            error,
                            result: Value::Nil,
                        },
                    )
                    .await?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        frames.extend(chunk.get(..read).unwrap_or_default());
    }
}
