//! Broker session: one connection, one channel, one consumer.
//!
//! A [`Session`] walks a strictly forward lifecycle:
//!
//! ```text
//! Unconnected → TransportConnected → Authenticated → ChannelOpen → Ready → Closing → Closed
//! ```
//!
//! - `connect`, `authenticate` and `open_channel` each advance exactly one
//!   step and fail if called out of order.
//! - Queues may be declared once the channel is open. Registering the
//!   session's single consumer moves it to `Ready`.
//! - `publish` and `consume` need `Ready`.
//! - `close` is allowed from anywhere, is best-effort, and is final. A closed
//!   session is never reconnected; [`Session::establish`] builds a new one.
//!
//! The session is `Send + Sync` and is shared as `Arc<Session>` between the
//! role that owns it and, on the client side, its dispatch task. It is
//! passed explicitly into [`RpcClient`](crate::RpcClient) and
//! [`RpcServer`](crate::RpcServer); there is no process-global session.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time;

use crate::retry::retry_with_backoff;
use crate::{
    //
    log_debug,
    log_info,
    log_warn,
    Address,
    BrokerConfig,
    BrokerPtr,
    Connector,
    Credentials,
    Delivery,
    MessageProperties,
    Publication,
    QueueSpec,
    Result,
    RpcError,
};

/// Lifecycle state of a [`Session`].
///
/// Variants are declared in lifecycle order; comparisons follow that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Unconnected,
    TransportConnected,
    Authenticated,
    ChannelOpen,
    Ready,
    Closing,
    /// Torn down. Terminal: every further operation fails with
    /// [`RpcError::SessionClosed`].
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::TransportConnected => "transport-connected",
            SessionState::Authenticated => "authenticated",
            SessionState::ChannelOpen => "channel-open",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

type SharedInbox = Arc<AsyncMutex<mpsc::UnboundedReceiver<Delivery>>>;

/// Acquire a mutex guard, ignoring poisoning.
///
/// The guarded values (a state tag, a consumer slot, a pending map) are
/// replaced wholesale under the lock, so a panicking holder cannot leave
/// them half-updated.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A single authenticated, channel-bearing connection to the broker.
pub struct Session {
    // ---
    broker: BrokerPtr,
    state: Mutex<SessionState>,
    endpoint: OnceLock<String>,
    consumer: Mutex<Option<(Address, SharedInbox)>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("broker_id", &self.broker_id())
            .field("state", &self.state())
            .field("endpoint", &self.endpoint())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wrap an unconnected backend.
    pub fn new(broker: BrokerPtr) -> Self {
        // ---
        Self {
            broker,
            state: Mutex::new(SessionState::Unconnected),
            endpoint: OnceLock::new(),
            consumer: Mutex::new(None),
        }
    }

    /// Connect, authenticate and open the channel, retrying per `config.retry`.
    ///
    /// Every attempt uses a fresh backend from `connector`; a failed attempt's
    /// session is closed before the next one starts.
    ///
    /// # Errors
    ///
    /// - Without retry: the first failure, unchanged
    ///   ([`RpcError::Transport`], [`RpcError::Auth`] or [`RpcError::Protocol`]).
    /// - With retry: [`RpcError::Connect`] once transient failures exhaust the
    ///   budget; non-transient failures are returned immediately.
    /// - [`RpcError::MissingConfig`] if no host is configured.
    pub async fn establish(connector: &dyn Connector, config: &BrokerConfig) -> Result<Arc<Self>> {
        // ---
        if config.host.trim().is_empty() {
            return Err(RpcError::MissingConfig("broker host".to_string()));
        }

        retry_with_backoff(config.retry.as_ref(), || {
            let session = Session::new(connector.broker());
            async move {
                match session.handshake(config).await {
                    Ok(()) => Ok(Arc::new(session)),
                    Err(err) => {
                        log_warn!(
                            "[{}] session setup failed in state {}: {err}",
                            session.broker_id(),
                            session.state()
                        );
                        session.close().await;
                        Err(err)
                    }
                }
            }
        })
        .await
    }

    async fn handshake(&self, config: &BrokerConfig) -> Result<()> {
        // ---
        self.connect(&config.host, config.port).await?;
        self.authenticate(&config.credentials, &config.vhost).await?;
        self.open_channel().await
    }

    pub fn state(&self) -> SessionState {
        *lock_ignore_poison(&self.state)
    }

    pub fn broker_id(&self) -> &str {
        self.broker.broker_id()
    }

    /// `host:port` once [`connect`](Self::connect) has been called.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.get().map(String::as_str)
    }

    /// Open the transport. `Unconnected → TransportConnected`.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        // ---
        self.require("connect", &[SessionState::Unconnected])?;
        let _ = self.endpoint.set(format!("{host}:{port}"));

        self.broker.open_transport(host, port).await?;
        self.advance("connect", SessionState::Unconnected, SessionState::TransportConnected)?;

        log_info!("[{}] transport connected to {host}:{port}", self.broker_id());
        Ok(())
    }

    /// Log in. `TransportConnected → Authenticated`.
    pub async fn authenticate(&self, credentials: &Credentials, vhost: &str) -> Result<()> {
        // ---
        self.require("authenticate", &[SessionState::TransportConnected])?;

        self.broker.authenticate(credentials, vhost).await?;
        self.advance(
            "authenticate",
            SessionState::TransportConnected,
            SessionState::Authenticated,
        )?;

        log_info!("[{}] authenticated as {}", self.broker_id(), credentials.username);
        Ok(())
    }

    /// Open the channel. `Authenticated → ChannelOpen`.
    pub async fn open_channel(&self) -> Result<()> {
        // ---
        self.require("open_channel", &[SessionState::Authenticated])?;

        self.broker.open_channel().await?;
        self.advance("open_channel", SessionState::Authenticated, SessionState::ChannelOpen)?;

        log_info!("[{}] channel open", self.broker_id());
        Ok(())
    }

    /// Declare a queue. Allowed once the channel is open.
    pub async fn declare_queue(&self, spec: &QueueSpec) -> Result<Address> {
        // ---
        self.require(
            "declare_queue",
            &[SessionState::ChannelOpen, SessionState::Ready],
        )?;

        let address = self.broker.declare_queue(spec).await?;
        log_debug!("[{}] declared queue {address} ({spec:?})", self.broker_id());
        Ok(address)
    }

    /// Register the session's consumer on `queue`. `ChannelOpen → Ready`.
    pub async fn register_consumer(&self, queue: &Address) -> Result<()> {
        // ---
        self.require("register_consumer", &[SessionState::ChannelOpen])?;

        let inbox = self.broker.consume(queue).await?;
        {
            let mut slot = lock_ignore_poison(&self.consumer);
            *slot = Some((queue.clone(), Arc::new(AsyncMutex::new(inbox.deliveries))));
        }
        self.advance("register_consumer", SessionState::ChannelOpen, SessionState::Ready)?;

        log_info!("[{}] consuming {queue}", self.broker_id());
        Ok(())
    }

    /// Publish `payload` to `address`. Fire-and-forget.
    pub async fn publish(
        &self,
        address: &Address,
        properties: MessageProperties,
        payload: Bytes,
    ) -> Result<()> {
        // ---
        self.require("publish", &[SessionState::Ready])?;

        self.broker
            .publish(Publication {
                address: address.clone(),
                properties,
                payload,
            })
            .await
    }

    /// Wait up to `timeout` for the next message on `queue`.
    ///
    /// The message is acknowledged as it is handed out. Concurrent callers
    /// take turns; each one's `timeout` covers its wait for the turn.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if nothing arrived in time
    /// - [`RpcError::SessionClosed`] if the session was closed, before or while waiting
    /// - [`RpcError::Protocol`] if `queue` is not this session's consumer queue or
    ///   the broker cancelled the consumer
    pub async fn consume(&self, queue: &Address, timeout: Duration) -> Result<Delivery> {
        // ---
        self.require("consume", &[SessionState::Ready])?;

        let inbox = {
            let slot = lock_ignore_poison(&self.consumer);
            match slot.as_ref() {
                Some((address, inbox)) if address == queue => Arc::clone(inbox),
                _ => {
                    return Err(RpcError::Protocol(format!(
                        "no consumer registered on queue {queue}"
                    )))
                }
            }
        };

        // the timeout also bounds the wait for a concurrent consumer's turn
        let received = time::timeout(timeout, async { inbox.lock().await.recv().await }).await;

        let delivery = match received {
            Err(_) => return Err(RpcError::Timeout),
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                return match self.state() {
                    SessionState::Closing | SessionState::Closed => Err(RpcError::SessionClosed),
                    _ => Err(RpcError::Protocol(format!(
                        "consumer on {queue} was cancelled by the broker"
                    ))),
                }
            }
        };

        // frees the prefetch slot; the broker may now send the next message
        if let Err(err) = self.broker.ack(&delivery).await {
            return match self.state() {
                SessionState::Closing | SessionState::Closed => Err(RpcError::SessionClosed),
                _ => Err(err),
            };
        }

        Ok(delivery)
    }

    /// Release the channel, then the transport. Idempotent.
    ///
    /// Failures while unwinding are logged, not returned.
    pub async fn close(&self) {
        // ---
        let previous = {
            let mut state = lock_ignore_poison(&self.state);
            match *state {
                SessionState::Closing | SessionState::Closed => return,
                previous => {
                    *state = SessionState::Closing;
                    previous
                }
            }
        };

        lock_ignore_poison(&self.consumer).take();

        if previous >= SessionState::ChannelOpen {
            if let Err(_err) = self.broker.close_channel().await {
                log_warn!("[{}] closing channel: {_err}", self.broker_id());
            }
        }

        if previous >= SessionState::TransportConnected {
            if let Err(_err) = self.broker.close_transport().await {
                log_warn!("[{}] closing transport: {_err}", self.broker_id());
            }
        }

        *lock_ignore_poison(&self.state) = SessionState::Closed;
        log_info!("[{}] session closed (was {previous})", self.broker_id());
    }

    pub(crate) fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        // ---
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(state_error(operation, state))
        }
    }

    fn advance(&self, operation: &'static str, from: SessionState, to: SessionState) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        if *state != from {
            // closed underneath us while the backend call was in flight
            return Err(state_error(operation, *state));
        }
        *state = to;
        Ok(())
    }
}

fn state_error(operation: &'static str, state: SessionState) -> RpcError {
    // ---
    match state {
        SessionState::Closing | SessionState::Closed => RpcError::SessionClosed,
        state => RpcError::InvalidState { operation, state },
    }
}
