use thiserror::Error;

use crate::SessionState;

/// Errors produced by the broker session, the RPC client and the RPC server.
///
/// Lifecycle failures (`Transport`, `Auth`, `Protocol`, `Connect`) are fatal
/// for the session that raised them. `Decode` and `Malformed` describe a
/// single bad message and never take a session down. `Timeout` is an
/// expected outcome: the client reports it to its caller and the server
/// treats it as the idle-shutdown signal.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Socket or DNS level failure while reaching the broker.
    #[error("transport error: {0}")]
    Transport(String),

    /// The broker rejected the supplied credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The broker rejected an operation (channel open, declare, consume, publish).
    #[error("broker protocol error: {0}")]
    Protocol(String),

    /// An inbound request payload could not be parsed.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The reply to a call could not be parsed.
    #[error("malformed response: {0}")]
    Malformed(#[source] prost::DecodeError),

    /// No message arrived within the allotted time.
    #[error("timed out waiting for a message")]
    Timeout,

    /// Retry budget exhausted while establishing a session.
    #[error("could not establish broker session after {attempts} attempt(s): {last}")]
    Connect {
        attempts: u32,
        #[source]
        last: Box<RpcError>,
    },

    /// Operation issued in a lifecycle state that does not permit it.
    #[error("`{operation}` is not allowed while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// The session has been closed; it cannot be used again.
    #[error("broker session is closed")]
    SessionClosed,

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),
}

impl RpcError {
    /// Whether establishing a fresh session might succeed where this one failed.
    ///
    /// Only transport-level failures qualify. A rejected login or channel will
    /// be rejected again.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }

    /// Short, stable name of the failure kind, for exit messages and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Transport(_) => "transport",
            RpcError::Auth(_) => "auth",
            RpcError::Protocol(_) => "protocol",
            RpcError::Decode(_) => "decode",
            RpcError::Malformed(_) => "malformed",
            RpcError::Timeout => "timeout",
            RpcError::Connect { .. } => "connect",
            RpcError::InvalidState { .. } => "invalid-state",
            RpcError::SessionClosed => "session-closed",
            RpcError::MissingConfig(_) => "missing-config",
        }
    }
}

/// Result type alias for broker and RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
