//! RPC server role.
//!
//! An [`RpcServer`] consumes the shared work queue one request at a time:
//! consume, decode, compute, publish the response to the request's reply
//! address with the request's correlation token. It stops cleanly once no
//! request has arrived for the configured idle timeout.
//!
//! ## Failure behavior
//!
//! - Idle timeout: clean shutdown, the session is closed and the
//!   [`ServeReport`] returned.
//! - Undecodable request: handled per [`MalformedPolicy`].
//! - Request without a reply address or correlation token: logged and
//!   dropped, nothing is published.
//! - Any session error: logged, the session is closed, the error returned.

mod handler;
mod work_queue;

use std::sync::Arc;

use crate::codec::{self, Request, Response};
use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
    Address,
    Delivery,
    MessageProperties,
    QueueSpec,
    Result,
    RpcError,
    ServerConfig,
    Session,
};

pub use handler::{Doubler, Handler};
pub use work_queue::provision_work_address;

/// What the server does with a request payload that fails to decode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Log and discard. No reply is sent.
    #[default]
    Drop,

    /// Forward the raw payload and its properties to `queue`, then continue.
    DeadLetter { queue: String },

    /// Stop serving and return the decode error.
    Abort,
}

/// Counters for one [`RpcServer::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeReport {
    /// Requests answered.
    pub handled: u64,
    /// Requests discarded: undecodable, or missing reply address or token.
    pub dropped: u64,
    /// Undecodable requests forwarded under [`MalformedPolicy::DeadLetter`].
    pub dead_lettered: u64,
}

/// Server bound to a work queue.
///
/// # Example
///
/// ```no_run
/// use broker_rpc::{BrokerConfig, Doubler, LapinConnector, RpcServer, ServerConfig, Session};
///
/// # async fn example() -> broker_rpc::Result<()> {
/// let session = Session::establish(&LapinConnector::new(), &BrokerConfig::default()).await?;
/// let server = RpcServer::bind(session, ServerConfig::default(), Doubler).await?;
///
/// let report = server.run().await?;
/// println!("answered {} request(s)", report.handled);
/// # Ok(())
/// # }
/// ```
pub struct RpcServer {
    // ---
    session: Arc<Session>,
    config: ServerConfig,
    work_queue: Address,
    handler: Box<dyn Handler>,
}

impl RpcServer {
    /// Provision the work queue on `session` and register as its consumer.
    ///
    /// With [`MalformedPolicy::DeadLetter`] the dead-letter queue is declared
    /// here too, so forwarded payloads are kept even before anyone reads them.
    ///
    /// # Errors
    ///
    /// [`RpcError::MissingConfig`] if the work queue name is empty, or the
    /// dead-letter queue is empty or equal to the work queue.
    pub async fn bind(session: Arc<Session>, config: ServerConfig, handler: impl Handler) -> Result<Self> {
        // ---
        // an empty name would make the broker invent a private queue
        if config.queue_name.is_empty() {
            return Err(RpcError::MissingConfig("server work queue".to_string()));
        }
        if let MalformedPolicy::DeadLetter { queue } = &config.malformed_policy {
            // forwarding into the work queue would hand the payload straight back
            if queue.is_empty() || *queue == config.queue_name {
                return Err(RpcError::MissingConfig(format!(
                    "dead-letter queue distinct from work queue {}",
                    config.queue_name
                )));
            }
        }

        let work_queue = provision_work_address(&session, &config.queue_name).await?;

        if let MalformedPolicy::DeadLetter { queue } = &config.malformed_policy {
            session.declare_queue(&QueueSpec::work(queue.as_str())).await?;
        }

        log_info!(
            "[{}] serving {work_queue} (idle timeout {:?})",
            session.broker_id(),
            config.idle_timeout
        );

        Ok(Self {
            session,
            config,
            work_queue,
            handler: Box::new(handler),
        })
    }

    pub fn work_address(&self) -> &Address {
        &self.work_queue
    }

    /// Serve requests until the idle timeout elapses or an error occurs.
    ///
    /// The session is closed when this returns, either way.
    pub async fn run(self) -> Result<ServeReport> {
        // ---
        let mut report = ServeReport::default();

        let outcome = loop {
            let delivery = match self
                .session
                .consume(&self.work_queue, self.config.idle_timeout)
                .await
            {
                Ok(delivery) => delivery,
                Err(RpcError::Timeout) => {
                    log_info!(
                        "[{}] no request for {:?}, shutting down",
                        self.session.broker_id(),
                        self.config.idle_timeout
                    );
                    break Ok(report);
                }
                Err(err) => break Err(err),
            };

            if let Err(err) = self.serve_one(delivery, &mut report).await {
                break Err(err);
            }
        };

        if let Err(_err) = &outcome {
            log_error!("[{}] server stopped: {_err}", self.session.broker_id());
        }

        self.session.close().await;
        outcome
    }

    async fn serve_one(&self, delivery: Delivery, report: &mut ServeReport) -> Result<()> {
        // ---
        let request = match codec::decode::<Request>(&delivery.payload) {
            Ok(request) => request,
            Err(err) => return self.reject_malformed(delivery, err, report).await,
        };

        let properties = &delivery.properties;
        let (Some(reply_to), Some(correlation_id)) = (&properties.reply_to, &properties.correlation_id)
        else {
            log_warn!(
                "request without reply address or correlation id dropped (reply_to={:?}, correlation_id={:?})",
                properties.reply_to,
                properties.correlation_id
            );
            report.dropped += 1;
            return Ok(());
        };

        let result = self.handler.handle(request.value);
        let response = Response::new(self.config.response_label.as_str(), result);

        self.session
            .publish(
                reply_to,
                MessageProperties::response(correlation_id.clone()),
                codec::encode(&response),
            )
            .await?;

        log_debug!("request {correlation_id}: {} -> {result}, replied to {reply_to}", request.value);
        report.handled += 1;
        Ok(())
    }

    async fn reject_malformed(
        &self,
        delivery: Delivery,
        err: prost::DecodeError,
        report: &mut ServeReport,
    ) -> Result<()> {
        // ---
        match &self.config.malformed_policy {
            MalformedPolicy::Drop => {
                log_warn!("undecodable request dropped: {err}");
                report.dropped += 1;
                Ok(())
            }
            MalformedPolicy::DeadLetter { queue } => {
                log_warn!("undecodable request forwarded to {queue}: {err}");
                self.session
                    .publish(&Address::from(queue.as_str()), delivery.properties, delivery.payload)
                    .await?;
                report.dead_lettered += 1;
                Ok(())
            }
            MalformedPolicy::Abort => Err(RpcError::Decode(err)),
        }
    }
}
