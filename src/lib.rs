//! Correlated request/response RPC through an AMQP 0-9-1 message broker.
//!
//! A client publishes a [`Request`] to a shared, durable work queue and waits
//! for the matching [`Response`] on a private, broker-named reply queue. A
//! server consumes the work queue one request at a time, computes the result
//! and publishes it to the request's reply address. Requests and responses
//! are matched by a [`CorrelationId`] carried in the message properties.
//!
//! Neither role talks to the other directly; the broker decouples them, and
//! any number of servers may compete for the same work queue.
//!
//! ## Layers
//!
//! - [`codec`]: the protobuf wire records.
//! - [`Broker`]: the seam to a concrete broker client (`lapin`, or the
//!   in-process [`MemoryHub`]).
//! - [`Session`]: one connection, one channel, one consumer, with a strict
//!   lifecycle.
//! - [`RpcClient`] and [`RpcServer`]: the two roles, each owning a session.
//!
//! Sessions are built explicitly with [`Session::establish`] and handed to a
//! role as `Arc<Session>`; there is no global state.

mod macros;
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

mod client;
mod config;
mod correlation;
mod domain;
mod error;
mod retry;
mod server;
mod session;
mod transport;

pub mod codec;

#[cfg(feature = "logging")]
pub mod telemetry;

// Re-export main types
pub use client::{provision_reply_address, RpcClient};
pub use server::{provision_work_address, Doubler, Handler, MalformedPolicy, RpcServer, ServeReport};
pub use session::{Session, SessionState};

pub use codec::{Request, Response};
pub use config::{BrokerConfig, ClientConfig, Credentials, ServerConfig, DEFAULT_PORT, DEFAULT_WORK_QUEUE};
pub use correlation::CorrelationId;
pub use error::{Result, RpcError};
pub use retry::RetryConfig;

pub use transport::{MemoryConnector, MemoryHub};

#[cfg(feature = "transport_lapin")]
pub use transport::LapinConnector;

// --- public re-exports
pub use domain::{
    //
    Address,
    Broker,
    BrokerPtr,
    Connector,
    Delivery,
    Inbox,
    MessageProperties,
    Publication,
    QueueSpec,
};
