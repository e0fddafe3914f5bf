//! MessagePack-RPC front end.
//!
//! Requests are `[0, msgid, method, params]`, responses
//! `[1, msgid, error, result]`, notifications `[2, method, params]`.
//! Workers receive `params` as a one-element array holding the argument map.

mod client;
mod codec;
mod server;

use std::future::Future;
use std::pin::Pin;

use rmpv::Value;
use thiserror::Error;

pub use client::RpcClient;
pub use codec::{CodecError, FrameReader, MAX_FRAME_LEN, Message};
pub use server::RpcServer;

/// Future returned by [`RpcService::call`]: the result value, or the error
/// value placed in the response.
pub type ServiceFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, Value>> + Send + 'a>>;

/// Dispatch target for incoming requests.
pub trait RpcService: Send + Sync + 'static {
    /// Handles `method` with positional `params`.
    fn call<'a>(&'a self, method: &'a str, params: &'a [Value]) -> ServiceFuture<'a>;
}

/// Errors raised by the RPC transport.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Socket level failure.
    #[error("rpc transport error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The peer closed the connection before answering.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    /// The peer answered with an error value.
    #[error("remote error: {0}")]
    Remote(String),
}

#[cfg(test)]
mod tests;
