use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::session::lock_ignore_poison;
use crate::CorrelationId;

/// Calls waiting for their reply.
///
/// Maps each outstanding correlation token to the oneshot channel its caller
/// is parked on. The dispatch task completes entries as replies arrive;
/// callers remove their own entry when they give up.
pub(super) struct PendingCalls {
    // ---
    calls: Mutex<HashMap<CorrelationId, oneshot::Sender<Bytes>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        // ---
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Register a call; the receiver yields the raw reply payload.
    pub fn register(&self, correlation_id: CorrelationId) -> oneshot::Receiver<Bytes> {
        // ---
        let (tx, rx) = oneshot::channel();
        lock_ignore_poison(&self.calls).insert(correlation_id, tx);
        rx
    }

    /// Hand `payload` to the call waiting on `correlation_id`.
    ///
    /// Returns false if no such call is waiting.
    pub fn complete(&self, correlation_id: &CorrelationId, payload: Bytes) -> bool {
        // ---
        let tx = lock_ignore_poison(&self.calls).remove(correlation_id);
        match tx {
            // a caller that timed out has dropped its receiver
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, correlation_id: &CorrelationId) -> bool {
        lock_ignore_poison(&self.calls).remove(correlation_id).is_some()
    }

    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.calls).len()
    }

    /// Drop every waiting call; their receivers see a closed channel.
    pub fn clear(&self) {
        lock_ignore_poison(&self.calls).clear();
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_register_and_complete() {
        // ---
        let pending = PendingCalls::new();
        let correlation_id = CorrelationId::generate();

        let rx = pending.register(correlation_id.clone());
        assert_eq!(pending.len(), 1);

        let reply = Bytes::from("reply");
        assert!(pending.complete(&correlation_id, reply.clone()));

        // Should be removed after completion
        assert_eq!(pending.len(), 0);
        assert_eq!(rx.blocking_recv().unwrap(), reply);
    }

    #[test]
    fn test_remove() {
        // ---
        let pending = PendingCalls::new();
        let correlation_id = CorrelationId::generate();

        let _rx = pending.register(correlation_id.clone());
        assert!(pending.remove(&correlation_id));
        assert_eq!(pending.len(), 0);

        // Second remove should return false
        assert!(!pending.remove(&correlation_id));
    }

    #[test]
    fn test_complete_unknown_id() {
        // ---
        let pending = PendingCalls::new();
        assert!(!pending.complete(&CorrelationId::generate(), Bytes::from("stray")));
    }

    #[test]
    fn test_complete_after_caller_gave_up() {
        // ---
        let pending = PendingCalls::new();
        let correlation_id = CorrelationId::generate();

        drop(pending.register(correlation_id.clone()));
        assert!(!pending.complete(&correlation_id, Bytes::from("late")));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_clear_wakes_waiters() {
        // ---
        let pending = PendingCalls::new();
        let rx = pending.register(CorrelationId::generate());

        pending.clear();
        assert!(rx.blocking_recv().is_err());
    }
}
