// src/domain/broker.rs

//! Broker domain abstractions.
//!
//! This module defines the seam between the [`Session`](crate::Session) state
//! machine and the concrete broker client that moves bytes. A backend
//! implements the AMQP 0-9-1 primitives the RPC protocol needs and nothing
//! more: open the transport, log in, open one channel, declare queues,
//! consume, publish, and tear down.
//!
//! Backends do not police call ordering. The session owns the lifecycle and
//! only calls a backend in the order connect → authenticate → open channel →
//! declare/consume/publish/ack → close channel → close transport.
//!
//! Concrete implementations live under `src/transport/`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{codec, CorrelationId, Credentials, Result};

/// A queue name as known to the broker.
///
/// On the default exchange the routing key equals the queue name, so an
/// `Address` is both where a message is published and where it is consumed
/// from. Cheap to clone.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Queue declaration parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSpec {
    /// Queue name; `None` asks the broker to generate one.
    pub name: Option<String>,
    /// Survives broker restarts.
    pub durable: bool,
    /// Usable only by the declaring connection; deleted when it closes.
    pub exclusive: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
}

impl QueueSpec {
    /// Broker-named, exclusive, auto-deleted queue for replies.
    pub fn reply() -> Self {
        Self {
            name: None,
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }

    /// Named, durable queue that several servers may consume from.
    pub fn work(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// Whether a re-declaration with `other` is equivalent to this one.
    pub fn is_equivalent(&self, other: &QueueSpec) -> bool {
        self.durable == other.durable
            && self.exclusive == other.exclusive
            && self.auto_delete == other.auto_delete
    }
}

/// The AMQP basic properties used by the RPC protocol.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: Option<Arc<str>>,
    pub reply_to: Option<Address>,
    pub correlation_id: Option<CorrelationId>,
}

impl MessageProperties {
    /// Properties for a request: content type, reply address and fresh token.
    pub fn request(reply_to: Address, correlation_id: CorrelationId) -> Self {
        Self {
            content_type: Some(Arc::from(codec::CONTENT_TYPE)),
            reply_to: Some(reply_to),
            correlation_id: Some(correlation_id),
        }
    }

    /// Properties for a response: content type and the echoed token.
    pub fn response(correlation_id: CorrelationId) -> Self {
        Self {
            content_type: Some(Arc::from(codec::CONTENT_TYPE)),
            reply_to: None,
            correlation_id: Some(correlation_id),
        }
    }
}

/// An outbound message.
#[derive(Clone, Debug)]
pub struct Publication {
    /// Destination queue (routing key on the default exchange).
    pub address: Address,
    pub properties: MessageProperties,
    pub payload: Bytes,
}

/// A message handed to a consumer.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Queue the message was consumed from.
    pub queue: Address,
    /// Channel-scoped tag the broker expects back in [`Broker::ack`].
    pub delivery_tag: u64,
    pub properties: MessageProperties,
    pub payload: Bytes,
}

/// Receiving end of a consumer registration.
///
/// The backend holds the sending half for as long as the consumer exists.
/// When the channel or connection goes away the sender is dropped and the
/// inbox reports end-of-stream.
#[derive(Debug)]
pub struct Inbox {
    pub deliveries: mpsc::UnboundedReceiver<Delivery>,
}

/// Broker backend.
///
/// # Notes
///
/// This trait uses `async_trait`; treat the methods as ordinary `async fn`s.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    // ---
    /// Identifier used in log lines.
    fn broker_id(&self) -> &str;

    /// Open the network transport to `host:port`.
    ///
    /// Fails with [`RpcError::Transport`](crate::RpcError::Transport).
    async fn open_transport(&self, host: &str, port: u16) -> Result<()>;

    /// Log in on the open transport.
    ///
    /// Fails with [`RpcError::Auth`](crate::RpcError::Auth) when the broker
    /// rejects the credentials.
    async fn authenticate(&self, credentials: &Credentials, vhost: &str) -> Result<()>;

    /// Open the single channel all later operations run on, prefetch 1.
    ///
    /// With prefetch 1 the broker holds back a consumer's next message until
    /// the previous one is acknowledged.
    async fn open_channel(&self) -> Result<()>;

    /// Declare a queue and return its (possibly broker-generated) address.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<Address>;

    /// Start consuming `queue`; deliveries arrive on the returned inbox.
    async fn consume(&self, queue: &Address) -> Result<Inbox>;

    /// Publish on the default exchange. Does not wait for a broker confirm.
    async fn publish(&self, publication: Publication) -> Result<()>;

    /// Acknowledge `delivery`, releasing the prefetch slot it occupies.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Close the channel, ending all consumers.
    async fn close_channel(&self) -> Result<()>;

    /// Close the transport.
    async fn close_transport(&self) -> Result<()>;
}

/// Shared broker pointer.
pub type BrokerPtr = Arc<dyn Broker>;

/// Factory for fresh, unconnected broker backends.
///
/// A session never reconnects a backend it has used; establishing again
/// (for example on retry) asks the connector for a new one.
pub trait Connector: Send + Sync {
    fn broker(&self) -> BrokerPtr;
}
