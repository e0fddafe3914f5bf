//! Frame codec over `rmpv` values.

use std::io::{self, Cursor};

use rmpv::Value;
use thiserror::Error;

/// Largest buffered, still incomplete frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1 << 20;

const REQUEST: u64 = 0;
const RESPONSE: u64 = 1;
const NOTIFICATION: u64 = 2;

/// Errors raised while encoding or decoding frames.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CodecError {
    /// Bytes on the wire are not valid MessagePack.
    #[error("invalid msgpack data: {0}")]
    Decode(String),
    /// A value could not be written.
    #[error("failed to encode message: {0}")]
    Encode(String),
    /// A decoded value is not an RPC message.
    #[error("malformed rpc message: {reason}")]
    Malformed {
        /// Message id, when one could be recovered.
        id: Option<u32>,
        /// What was wrong with the message.
        reason: String,
    },
    /// The peer sent more than [`MAX_FRAME_LEN`] bytes without completing a frame.
    #[error("frame exceeds {MAX_FRAME_LEN} bytes")]
    FrameTooLarge,
}

/// One MessagePack-RPC message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A call expecting a response.
    Request {
        /// Correlates the response.
        id: u32,
        /// Method name.
        method: String,
        /// Positional arguments.
        params: Vec<Value>,
    },
    /// The answer to a request.
    Response {
        /// Id of the answered request.
        id: u32,
        /// Nil on success.
        error: Value,
        /// Nil on failure.
        result: Value,
    },
    /// A call without a response.
    Notification {
        /// Method name.
        method: String,
        /// Positional arguments.
        params: Vec<Value>,
    },
}

fn malformed(id: Option<u32>, reason: &str) -> CodecError {
    CodecError::Malformed {
        id,
        reason: reason.to_owned(),
    }
}

fn message_id(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|id| u32::try_from(id).ok())
}

fn params_of(value: Value, id: Option<u32>) -> Result<Vec<Value>, CodecError> {
    match value {
        Value::Array(params) => Ok(params),
        _ => Err(malformed(id, "params must be an array")),
    }
}

fn method_of(value: &Value, id: Option<u32>) -> Result<String, CodecError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| malformed(id, "method must be a string"))
}

impl Message {
    /// Interprets a decoded value as a message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] when the value has the wrong shape.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let Value::Array(items) = value else {
            return Err(malformed(None, "message must be an array"));
        };
        let id = items.get(1).and_then(message_id);
        let kind = items.first().and_then(Value::as_u64);
        let mut fields = items.into_iter();

        match (kind, fields.len()) {
            (Some(REQUEST), 4) => {
                let request_id = id.ok_or_else(|| malformed(None, "message id must be a u32"))?;
                let (_, _, method, params) =
                    (fields.next(), fields.next(), fields.next(), fields.next());
                Ok(Self::Request {
                    id: request_id,
                    method: method_of(&method.unwrap_or(Value::Nil), id)?,
                    params: params_of(params.unwrap_or(Value::Nil), id)?,
                })
            }
            (Some(RESPONSE), 4) => {
                let response_id = id.ok_or_else(|| malformed(None, "message id must be a u32"))?;
                let (_, _, error, result) =
                    (fields.next(), fields.next(), fields.next(), fields.next());
                Ok(Self::Response {
                    id: response_id,
                    error: error.unwrap_or(Value::Nil),
                    result: result.unwrap_or(Value::Nil),
                })
            }
            (Some(NOTIFICATION), 3) => {
                let (_, method, params) = (fields.next(), fields.next(), fields.next());
                Ok(Self::Notification {
                    method: method_of(&method.unwrap_or(Value::Nil), None)?,
                    params: params_of(params.unwrap_or(Value::Nil), None)?,
                })
            }
            _ => Err(malformed(id, "unknown message type or arity")),
        }
    }

    /// Converts the message into its array form.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Request { id, method, params } => Value::Array(vec![
                Value::from(REQUEST),
                Value::from(id),
                Value::from(method),
                Value::Array(params),
            ]),
            Self::Response { id, error, result } => Value::Array(vec![
                Value::from(RESPONSE),
                Value::from(id),
                error,
                result,
            ]),
            Self::Notification { method, params } => Value::Array(vec![
                Value::from(NOTIFICATION),
                Value::from(method),
                Value::Array(params),
            ]),
        }
    }

    /// Serialises the message into one frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the writer fails.
    pub fn encode(self) -> Result<Vec<u8>, CodecError> {
        let mut buffer = Vec::new();
        rmpv::encode::write_value(&mut buffer, &self.into_value())
            .map_err(|err| CodecError::Encode(err.to_string()))?;
        Ok(buffer)
    }
}

fn is_incomplete(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(io_err)
        | rmpv::decode::Error::InvalidDataRead(io_err) => {
            io_err.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

/// Accumulates stream bytes and yields complete messages.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    /// Appends bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Decodes the next complete message, if the buffer holds one.
    ///
    /// The bytes of a malformed but complete value are consumed before the
    /// error is returned, so the stream stays aligned.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] for invalid MessagePack,
    /// [`CodecError::FrameTooLarge`] when an incomplete frame outgrows the
    /// limit, and [`CodecError::Malformed`] for values that are not messages.
    pub fn next_message(&mut self) -> Result<Option<Message>, CodecError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(self.buffer.as_slice());
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = usize::try_from(cursor.position()).unwrap_or(self.buffer.len());
                self.buffer.drain(..consumed);
                Message::from_value(value).map(Some)
            }
            Err(err) if is_incomplete(&err) => {
                if self.buffer.len() > MAX_FRAME_LEN {
                    return Err(CodecError::FrameTooLarge);
                }
                Ok(None)
            }
            Err(err) => Err(CodecError::Decode(err.to_string())),
        }
    }
}
