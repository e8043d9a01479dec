//! Wire codec for request and response records.
//!
//! Both records are protobuf messages with the same two-field layout:
//!
//! | tag | field   | type     |
//! |-----|---------|----------|
//! | 1   | `id`    | `string` |
//! | 2   | `value` | `int64`  |
//!
//! Protobuf skips fields it does not know, so peers built against a newer
//! schema with additional fields still interoperate. Field 2 is wire
//! compatible with peers that declare it `int32`, for every `int32` value.
//!
//! Encoding is a pure, deterministic transform. Decoding fails on truncated
//! or malformed input; callers log and drop such messages.

use bytes::Bytes;
use prost::Message;

/// Content-type marker attached to every message this crate publishes.
pub const CONTENT_TYPE: &str = "application/x-protobuf";

/// Default label carried by requests.
pub const DEFAULT_REQUEST_LABEL: &str = "test-request";

/// Default label carried by responses.
pub const DEFAULT_RESPONSE_LABEL: &str = "test-response";

/// A numeric request issued by the client.
#[derive(Clone, PartialEq, Message)]
pub struct Request {
    /// Opaque label; not interpreted by the server.
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(int64, tag = "2")]
    pub value: i64,
}

/// The server's answer to a [`Request`].
#[derive(Clone, PartialEq, Message)]
pub struct Response {
    /// Opaque label; not interpreted by the client.
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(int64, tag = "2")]
    pub value: i64,
}

impl Request {
    pub fn new(id: impl Into<String>, value: i64) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

impl Response {
    pub fn new(id: impl Into<String>, value: i64) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

/// Serialize a record into a payload.
pub fn encode<M: Message>(record: &M) -> Bytes {
    // ---
    Bytes::from(record.encode_to_vec())
}

/// Parse a payload into a record.
///
/// # Errors
///
/// Returns [`prost::DecodeError`] on truncated input, invalid wire types,
/// or invalid UTF-8 in string fields.
pub fn decode<M: Message + Default>(payload: &[u8]) -> Result<M, prost::DecodeError> {
    // ---
    M::decode(payload)
}
