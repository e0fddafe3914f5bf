//! Minimal async client for issuing calls to a worker.

use rmpv::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use super::RpcError;
use super::codec::{FrameReader, Message};

const READ_CHUNK: usize = 8 * 1024;

/// One connection issuing sequential calls.
#[derive(Debug)]
pub struct RpcClient {
    stream: TcpStream,
    frames: FrameReader,
    next_id: u32,
}

fn describe(error: &Value) -> String {
    error
        .as_str()
        .map_or_else(|| error.to_string(), str::to_owned)
}

impl RpcClient {
    /// Connects to a worker.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Io`] when the connection fails.
    pub async fn connect(address: impl ToSocketAddrs) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self {
            stream,
            frames: FrameReader::default(),
            next_id: 0,
        })
    }

    /// Calls `method` with a single argument map and waits for the answer.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] when the worker answers with an error
    /// value, and transport or codec errors otherwise.
    pub async fn call(&mut self, method: &str, args: Value) -> Result<Value, RpcError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let request = Message::Request {
            id,
            method: method.to_owned(),
            params: vec![args],
        };
        self.stream.write_all(&request.encode()?).await?;

        let mut chunk = vec![0_u8; READ_CHUNK];
        loop {
            while let Some(message) = self.frames.next_message()? {
                match message {
                    Message::Response { id: answered, error, result } if answered == id => {
                        if error.is_nil() {
                            return Ok(result);
                        }
                        return Err(RpcError::Remote(describe(&error)));
                    }
                    other => tracing::debug!(?other, "skipping unrelated message"),
                }
            }

            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(RpcError::ConnectionClosed);
            }
            self.frames.extend(chunk.get(..read).unwrap_or_default());
        }
    }
}
