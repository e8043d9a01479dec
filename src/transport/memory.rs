//! In-memory broker.
//!
//! A [`MemoryHub`] plays the part of a broker process: it owns the queues and
//! routes publications between any number of connections made through a
//! [`MemoryConnector`]. It is intended primarily for tests, local execution,
//! and as a reference for broker semantics.
//!
//! ## Reference Semantics
//!
//! The hub follows the AMQP 0-9-1 behavior the RPC protocol relies on:
//!
//! - Publishing goes through the default exchange: the routing key is the
//!   queue name, and a message for a queue that does not exist is dropped.
//! - A queue with no consumer keeps its messages until one attaches.
//! - Several consumers on one queue are served round-robin, one message each.
//! - Every consumer runs with prefetch 1: it is sent nothing new until it
//!   acknowledges the message it holds. Messages held by a consumer that goes
//!   away return to the front of the queue.
//! - Re-declaring a queue with the same flags is a no-op; different flags fail
//!   with `PRECONDITION_FAILED`.
//! - Exclusive queues belong to the declaring connection and disappear with
//!   it. Auto-delete queues disappear when their last consumer goes away.
//! - Closing a channel ends its consumers, which ends their inboxes.
//!
//! ## Test hooks
//!
//! The hub can be told to be unreachable, to refuse the next few connection
//! attempts, to reject channels, to truncate payloads in transit, to cancel
//! consumers, or to accept extra accounts. Only `guest` with password `guest`
//! is known out of the box.
//!
//! ## Non-Goals
//!
//! Persistence, flow control and exchanges other than the default one are
//! not modelled.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::session::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    Address,
    Broker,
    BrokerPtr,
    Connector,
    Credentials,
    Delivery,
    Inbox,
    Publication,
    QueueSpec,
    Result,
    RpcError,
};

struct Consumer {
    connection: u64,
    tx: mpsc::UnboundedSender<Delivery>,
    // prefetch 1: the one delivery this consumer holds until it acks
    unacked: Option<Delivery>,
}

struct MemoryQueue {
    // ---
    spec: QueueSpec,
    owner: Option<u64>,
    consumers: Vec<Consumer>,
    cursor: usize,
    next_tag: u64,
    backlog: VecDeque<Delivery>,
}

impl MemoryQueue {
    /// Hand backlog messages to idle consumers, round-robin, one each.
    fn dispatch(&mut self) {
        // ---
        while !self.backlog.is_empty() {
            let Some(index) = self.next_idle() else {
                return;
            };
            let Some(mut delivery) = self.backlog.pop_front() else {
                return;
            };

            self.next_tag += 1;
            delivery.delivery_tag = self.next_tag;

            match self.consumers[index].tx.send(delivery.clone()) {
                Ok(()) => {
                    self.consumers[index].unacked = Some(delivery);
                    self.cursor = index + 1;
                }
                Err(mpsc::error::SendError(returned)) => {
                    // inbox dropped without closing the channel
                    self.consumers.remove(index);
                    self.backlog.push_front(returned);
                }
            }
        }
    }

    fn next_idle(&self) -> Option<usize> {
        // ---
        let count = self.consumers.len();
        (0..count)
            .map(|step| (self.cursor + step) % count)
            .find(|&index| self.consumers[index].unacked.is_none())
    }

    fn ack(&mut self, connection: u64, delivery_tag: u64) -> bool {
        // ---
        let held = self.consumers.iter_mut().find(|c| {
            c.connection == connection
                && c.unacked.as_ref().is_some_and(|d| d.delivery_tag == delivery_tag)
        });
        match held {
            Some(consumer) => {
                consumer.unacked = None;
                self.dispatch();
                true
            }
            None => false,
        }
    }

    /// Remove the consumers matching `cancel`, requeueing what they held.
    fn drop_consumers(&mut self, cancel: impl Fn(&Consumer) -> bool) -> bool {
        // ---
        let before = self.consumers.len();
        let mut requeued = Vec::new();
        self.consumers.retain_mut(|consumer| {
            if !cancel(&*consumer) {
                return true;
            }
            requeued.extend(consumer.unacked.take());
            false
        });
        for delivery in requeued.into_iter().rev() {
            self.backlog.push_front(delivery);
        }
        self.dispatch();
        before != self.consumers.len()
    }
}

struct HubState {
    // ---
    reachable: bool,
    refuse_connects: u32,
    reject_channels: bool,
    truncate_publishes: u32,
    accounts: HashMap<String, String>,
    queues: HashMap<String, MemoryQueue>,
}

/// An in-process stand-in for a broker.
pub struct MemoryHub {
    // ---
    state: Mutex<HubState>,
    next_connection: AtomicU64,
}

impl MemoryHub {
    /// A reachable hub with a single `guest`/`guest` account.
    pub fn new() -> Arc<Self> {
        // ---
        let mut accounts = HashMap::new();
        accounts.insert("guest".to_string(), "guest".to_string());

        Arc::new(Self {
            state: Mutex::new(HubState {
                reachable: true,
                refuse_connects: 0,
                reject_channels: false,
                truncate_publishes: 0,
                accounts,
                queues: HashMap::new(),
            }),
            next_connection: AtomicU64::new(1),
        })
    }

    /// Make new connection attempts fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        lock_ignore_poison(&self.state).reachable = reachable;
    }

    /// Refuse the next `count` connection attempts, then accept again.
    pub fn refuse_next_connects(&self, count: u32) {
        lock_ignore_poison(&self.state).refuse_connects = count;
    }

    /// Refuse every channel open with a protocol error.
    pub fn reject_channels(&self, reject: bool) {
        lock_ignore_poison(&self.state).reject_channels = reject;
    }

    /// Cut the payload of the next `count` publications in half.
    pub fn truncate_next_publishes(&self, count: u32) {
        lock_ignore_poison(&self.state).truncate_publishes = count;
    }

    pub fn add_account(&self, username: impl Into<String>, password: impl Into<String>) {
        lock_ignore_poison(&self.state)
            .accounts
            .insert(username.into(), password.into());
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        lock_ignore_poison(&self.state).queues.contains_key(name)
    }

    /// Messages waiting in `name` for a consumer; 0 if the queue is missing.
    pub fn queue_depth(&self, name: &str) -> usize {
        lock_ignore_poison(&self.state)
            .queues
            .get(name)
            .map_or(0, |q| q.backlog.len())
    }

    pub fn consumer_count(&self, name: &str) -> usize {
        lock_ignore_poison(&self.state)
            .queues
            .get(name)
            .map_or(0, |q| q.consumers.len())
    }

    /// Messages delivered from `name` and not yet acknowledged.
    pub fn unacked_count(&self, name: &str) -> usize {
        lock_ignore_poison(&self.state)
            .queues
            .get(name)
            .map_or(0, |q| q.consumers.iter().filter(|c| c.unacked.is_some()).count())
    }

    /// Total number of queues on the hub.
    pub fn queue_count(&self) -> usize {
        lock_ignore_poison(&self.state).queues.len()
    }

    /// Cancel every consumer on `name` from the broker side.
    ///
    /// Their inboxes end and unacknowledged messages go back to the queue.
    /// An auto-delete queue left without consumers is deleted.
    pub fn cancel_consumers(&self, name: &str) {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let Some(queue) = state.queues.get_mut(name) else {
            return;
        };
        queue.drop_consumers(|_| true);
        if queue.spec.auto_delete {
            state.queues.remove(name);
        }
    }

    fn connect(&self, host: &str, port: u16) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        if !state.reachable {
            return Err(RpcError::Transport(format!(
                "connection refused: {host}:{port}"
            )));
        }
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(RpcError::Transport(format!(
                "connection reset by peer: {host}:{port}"
            )));
        }
        Ok(())
    }

    fn login(&self, credentials: &Credentials) -> Result<()> {
        // ---
        let state = lock_ignore_poison(&self.state);
        match state.accounts.get(&credentials.username) {
            Some(password) if *password == credentials.password => Ok(()),
            _ => Err(RpcError::Auth(format!(
                "ACCESS_REFUSED - login refused for user '{}'",
                credentials.username
            ))),
        }
    }

    fn open_channel(&self) -> Result<()> {
        // ---
        if lock_ignore_poison(&self.state).reject_channels {
            return Err(RpcError::Protocol(
                "CHANNEL_ERROR - channel open refused".to_string(),
            ));
        }
        Ok(())
    }

    fn declare(&self, connection: u64, spec: &QueueSpec) -> Result<Address> {
        // ---
        let mut state = lock_ignore_poison(&self.state);

        let name = match &spec.name {
            Some(name) => name.clone(),
            None => format!("amq.gen-{}", uuid::Uuid::new_v4().simple()),
        };

        if let Some(existing) = state.queues.get(&name) {
            if let Some(owner) = existing.owner {
                if owner != connection {
                    return Err(RpcError::Protocol(format!(
                        "RESOURCE_LOCKED - queue '{name}' is exclusive to another connection"
                    )));
                }
            }
            if !existing.spec.is_equivalent(spec) {
                return Err(RpcError::Protocol(format!(
                    "PRECONDITION_FAILED - inequivalent arguments for queue '{name}'"
                )));
            }
            return Ok(Address::from(name));
        }

        state.queues.insert(
            name.clone(),
            MemoryQueue {
                spec: spec.clone(),
                owner: spec.exclusive.then_some(connection),
                consumers: Vec::new(),
                cursor: 0,
                next_tag: 0,
                backlog: VecDeque::new(),
            },
        );

        Ok(Address::from(name))
    }

    fn consume(&self, connection: u64, queue: &Address) -> Result<Inbox> {
        // ---
        let mut state = lock_ignore_poison(&self.state);

        let Some(target) = state.queues.get_mut(queue.as_str()) else {
            return Err(RpcError::Protocol(format!(
                "NOT_FOUND - no queue '{queue}'"
            )));
        };
        if target.owner.is_some_and(|owner| owner != connection) {
            return Err(RpcError::Protocol(format!(
                "RESOURCE_LOCKED - queue '{queue}' is exclusive to another connection"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        target.consumers.push(Consumer {
            connection,
            tx,
            unacked: None,
        });
        target.dispatch();

        Ok(Inbox { deliveries: rx })
    }

    fn publish(&self, publication: Publication) {
        // ---
        let mut state = lock_ignore_poison(&self.state);

        let mut payload = publication.payload;
        if state.truncate_publishes > 0 {
            state.truncate_publishes -= 1;
            payload = payload.slice(..payload.len() / 2);
        }

        match state.queues.get_mut(publication.address.as_str()) {
            Some(queue) => {
                queue.backlog.push_back(Delivery {
                    queue: publication.address,
                    delivery_tag: 0,
                    properties: publication.properties,
                    payload,
                });
                queue.dispatch();
            }
            None => {
                log_debug!("memory hub: no queue '{}', message dropped", publication.address);
            }
        }
    }

    fn ack(&self, connection: u64, delivery: &Delivery) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);

        let acked = state
            .queues
            .get_mut(delivery.queue.as_str())
            .is_some_and(|queue| queue.ack(connection, delivery.delivery_tag));
        if acked {
            Ok(())
        } else {
            Err(RpcError::Protocol(format!(
                "PRECONDITION_FAILED - unknown delivery tag {}",
                delivery.delivery_tag
            )))
        }
    }

    /// Cancel `connection`'s consumers; with `disconnect` also drop its exclusive queues.
    fn release(&self, connection: u64, disconnect: bool) {
        // ---
        let mut state = lock_ignore_poison(&self.state);

        state.queues.retain(|_name, queue| {
            let lost_consumer = queue.drop_consumers(|c| c.connection == connection);
            if disconnect && queue.owner == Some(connection) {
                return false;
            }
            !(queue.spec.auto_delete && lost_consumer && queue.consumers.is_empty())
        });
    }
}

/// One connection to a [`MemoryHub`].
struct MemoryBroker {
    // ---
    broker_id: String,
    connection: u64,
    hub: Arc<MemoryHub>,
    channel_open: AtomicBool,
}

impl MemoryBroker {
    fn ensure_channel(&self) -> Result<()> {
        if self.channel_open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RpcError::Protocol("channel is not open".to_string()))
        }
    }
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    // ---
    fn broker_id(&self) -> &str {
        &self.broker_id
    }

    async fn open_transport(&self, host: &str, port: u16) -> Result<()> {
        self.hub.connect(host, port)
    }

    async fn authenticate(&self, credentials: &Credentials, _vhost: &str) -> Result<()> {
        self.hub.login(credentials)
    }

    async fn open_channel(&self) -> Result<()> {
        // ---
        self.hub.open_channel()?;
        self.channel_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<Address> {
        // ---
        self.ensure_channel()?;
        self.hub.declare(self.connection, spec)
    }

    async fn consume(&self, queue: &Address) -> Result<Inbox> {
        // ---
        self.ensure_channel()?;
        self.hub.consume(self.connection, queue)
    }

    async fn publish(&self, publication: Publication) -> Result<()> {
        // ---
        self.ensure_channel()?;
        self.hub.publish(publication);
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        // ---
        self.ensure_channel()?;
        self.hub.ack(self.connection, delivery)
    }

    async fn close_channel(&self) -> Result<()> {
        // ---
        if self.channel_open.swap(false, Ordering::SeqCst) {
            self.hub.release(self.connection, false);
        }
        Ok(())
    }

    async fn close_transport(&self) -> Result<()> {
        // ---
        self.channel_open.store(false, Ordering::SeqCst);
        self.hub.release(self.connection, true);
        Ok(())
    }
}

/// Hands out connections to a shared [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryConnector {
    hub: Arc<MemoryHub>,
}

impl MemoryConnector {
    pub fn new(hub: Arc<MemoryHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }
}

impl Connector for MemoryConnector {
    fn broker(&self) -> BrokerPtr {
        // ---
        let connection = self.hub.next_connection.fetch_add(1, Ordering::Relaxed);
        Arc::new(MemoryBroker {
            broker_id: format!("memory-{connection}"),
            connection,
            hub: Arc::clone(&self.hub),
            channel_open: AtomicBool::new(false),
        })
    }
}
