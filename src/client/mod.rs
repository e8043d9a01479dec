//! RPC client role.
//!
//! An [`RpcClient`] publishes [`Request`]s to the work queue and waits for
//! the matching [`Response`] on its own reply queue.
//!
//! ## Correlation
//!
//! Every call gets a fresh [`CorrelationId`]. A single dispatch task consumes
//! the reply queue and routes each reply to the call waiting on its token.
//! Replies carrying an unknown token (late answers to calls that already
//! timed out, or stray messages) or no token at all are logged and
//! discarded. Any number of calls may be outstanding on one client.
//!
//! ## Failure behavior
//!
//! - No reply in time → [`RpcError::Timeout`]; the request is not re-sent.
//! - Reply that does not decode → [`RpcError::Malformed`].
//! - Session closed before the reply → [`RpcError::SessionClosed`].
//! - Reply consumer lost (cancelled by the broker) → the session is closed
//!   and every waiting and later call fails with [`RpcError::Protocol`].

mod pending;
mod reply_queue;

use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::codec::{self, Request, Response};
use crate::session::lock_ignore_poison;
use crate::{
    //
    log_debug,
    log_error,
    log_warn,
    Address,
    ClientConfig,
    CorrelationId,
    MessageProperties,
    Result,
    RpcError,
    Session,
};

use pending::PendingCalls;
pub use reply_queue::provision_reply_address;

/// How long one dispatcher wait lasts before it re-checks for shutdown.
const DISPATCH_POLL: Duration = Duration::from_secs(1);

/// Client handle. Cheap to clone; clones share the session and reply queue.
///
/// # Example
///
/// ```no_run
/// use broker_rpc::{BrokerConfig, ClientConfig, LapinConnector, RpcClient, Session};
/// use std::time::Duration;
///
/// # async fn example() -> broker_rpc::Result<()> {
/// let session = Session::establish(&LapinConnector::new(), &BrokerConfig::default()).await?;
/// let client = RpcClient::start(session, ClientConfig::default()).await?;
///
/// let response = client.call(21, Duration::from_secs(2)).await?;
/// assert_eq!(response.value, 42);
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    session: Arc<Session>,
    config: ClientConfig,
    work_queue: Address,
    reply_queue: Address,
    pending: Arc<PendingCalls>,
    // why reply dispatch stopped, if it failed
    fault: Arc<OnceLock<String>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn fault(&self) -> Option<RpcError> {
        self.fault
            .get()
            .map(|reason| RpcError::Protocol(format!("reply dispatch stopped: {reason}")))
    }
}

impl RpcClient {
    /// Provision the reply queue on `session` and start the dispatch task.
    ///
    /// `session` must have its channel open and no consumer registered.
    pub async fn start(session: Arc<Session>, config: ClientConfig) -> Result<Self> {
        // ---
        if config.work_queue.is_empty() {
            return Err(RpcError::MissingConfig("client work queue".to_string()));
        }

        let reply_queue = provision_reply_address(&session).await?;
        let pending = Arc::new(PendingCalls::new());
        let fault = Arc::new(OnceLock::new());

        let dispatch = tokio::spawn(dispatch_replies(
            Arc::clone(&session),
            reply_queue.clone(),
            Arc::downgrade(&pending),
            Arc::clone(&fault),
        ));

        log_debug!(
            "[{}] client ready: requests -> {}, replies <- {reply_queue}",
            session.broker_id(),
            config.work_queue
        );

        Ok(Self {
            inner: Arc::new(Inner {
                work_queue: Address::from(config.work_queue.as_str()),
                session,
                config,
                reply_queue,
                pending,
                fault,
                dispatch: Mutex::new(Some(dispatch)),
            }),
        })
    }

    /// Send `value` and wait up to `timeout` for the matching response.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if no matching reply arrived in time
    /// - [`RpcError::Malformed`] if the matching reply did not decode
    /// - [`RpcError::SessionClosed`] if the client was closed
    /// - [`RpcError::Protocol`] if the reply consumer was lost
    /// - any publish error from the session
    pub async fn call(&self, value: i64, timeout: Duration) -> Result<Response> {
        // ---
        let inner = &self.inner;
        if let Some(fault) = inner.fault() {
            return Err(fault);
        }

        let correlation_id = CorrelationId::generate();
        let request = Request::new(inner.config.request_label.as_str(), value);

        let rx = inner.pending.register(correlation_id.clone());

        let properties = MessageProperties::request(inner.reply_queue.clone(), correlation_id.clone());
        if let Err(err) = inner
            .session
            .publish(&inner.work_queue, properties, codec::encode(&request))
            .await
        {
            inner.pending.remove(&correlation_id);
            return Err(inner.fault().unwrap_or(err));
        }

        log_debug!("call {correlation_id}: sent {value} to {}", inner.work_queue);

        let payload = match time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(_)) => return Err(inner.fault().unwrap_or(RpcError::SessionClosed)),
            Err(_) => {
                inner.pending.remove(&correlation_id);
                return Err(RpcError::Timeout);
            }
        };

        codec::decode::<Response>(&payload).map_err(|e| {
            log_error!("call {correlation_id}: undecodable response: {e}");
            RpcError::Malformed(e)
        })
    }

    /// [`call`](Self::call) with the configured request timeout.
    pub async fn call_default(&self, value: i64) -> Result<Response> {
        self.call(value, self.inner.config.request_timeout).await
    }

    /// Run [`call_default`](Self::call_default) on a background task.
    ///
    /// Lets a UI thread fire a request and poll or await the handle later.
    pub fn spawn_call(&self, value: i64) -> JoinHandle<Result<Response>> {
        // ---
        let client = self.clone();
        tokio::spawn(async move { client.call_default(value).await })
    }

    /// The broker-generated queue replies arrive on.
    pub fn reply_address(&self) -> &Address {
        &self.inner.reply_queue
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    /// Number of calls currently waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Close the session and stop dispatching.
    ///
    /// Calls still waiting fail with [`RpcError::SessionClosed`]. Shared by
    /// every clone of this client.
    pub async fn close(&self) {
        // ---
        self.inner.session.close().await;

        let dispatch = lock_ignore_poison(&self.inner.dispatch).take();
        if let Some(dispatch) = dispatch {
            let _ = dispatch.await;
        }
        self.inner.pending.clear();
    }
}

/// Route replies to waiting calls until the session ends or the client is dropped.
///
/// Any other consume error is fatal: it is recorded in `fault` and the
/// session is closed.
async fn dispatch_replies(
    session: Arc<Session>,
    reply_queue: Address,
    pending: Weak<PendingCalls>,
    fault: Arc<OnceLock<String>>,
) {
    // ---
    loop {
        let delivery = match session.consume(&reply_queue, DISPATCH_POLL).await {
            Ok(delivery) => delivery,
            Err(RpcError::Timeout) => {
                if pending.strong_count() == 0 {
                    break;
                }
                continue;
            }
            Err(RpcError::SessionClosed) => break,
            Err(err) => {
                log_error!("[{}] reply dispatch stopped: {err}", session.broker_id());
                let reason = match err {
                    RpcError::Protocol(reason) => reason,
                    other => other.to_string(),
                };
                let _ = fault.set(reason);
                session.close().await;
                break;
            }
        };

        let Some(pending) = pending.upgrade() else {
            break;
        };

        let Some(correlation_id) = delivery.properties.correlation_id else {
            log_warn!("reply without correlation id on {reply_queue} discarded");
            continue;
        };

        if !pending.complete(&correlation_id, delivery.payload) {
            log_warn!("reply for unknown call {correlation_id} discarded");
        }
    }

    if let Some(pending) = pending.upgrade() {
        pending.clear();
    }
    log_debug!("[{}] reply dispatch for {reply_queue} ended", session.broker_id());
}
