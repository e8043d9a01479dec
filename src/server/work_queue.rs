use crate::{Address, QueueSpec, Result, Session, SessionState};

/// Declare the durable work queue `name` and start consuming it.
///
/// Several servers may do this for the same name; the broker then hands
/// each request to one of them. Re-declaring an existing queue with the same
/// flags is a no-op.
///
/// # Errors
///
/// [`RpcError::Protocol`](crate::RpcError::Protocol) if a queue called `name`
/// exists with different flags, or
/// [`RpcError::InvalidState`](crate::RpcError::InvalidState) unless the
/// session has its channel open and no consumer yet.
pub async fn provision_work_address(session: &Session, name: &str) -> Result<Address> {
    // ---
    session.require("provision_work_address", &[SessionState::ChannelOpen])?;

    let address = session.declare_queue(&QueueSpec::work(name)).await?;
    session.register_consumer(&address).await?;
    Ok(address)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{BrokerConfig, MemoryConnector, MemoryHub, RpcError};

    async fn session(connector: &MemoryConnector) -> std::sync::Arc<Session> {
        Session::establish(connector, &BrokerConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_servers_share_one_work_queue() {
        // ---
        let hub = MemoryHub::new();
        let connector = MemoryConnector::new(hub.clone());

        let (a, b) = (session(&connector).await, session(&connector).await);
        let first = provision_work_address(&a, "rpc_queue").await.unwrap();
        let second = provision_work_address(&b, "rpc_queue").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(hub.consumer_count("rpc_queue"), 2);
    }

    #[tokio::test]
    async fn test_work_queue_outlives_its_server() {
        // ---
        let hub = MemoryHub::new();
        let connector = MemoryConnector::new(hub.clone());

        let server = session(&connector).await;
        provision_work_address(&server, "rpc_queue").await.unwrap();
        server.close().await;

        assert!(hub.queue_exists("rpc_queue"));
    }

    #[tokio::test]
    async fn test_conflicting_queue_is_rejected() {
        // ---
        let connector = MemoryConnector::new(MemoryHub::new());

        let other = session(&connector).await;
        let mut transient = QueueSpec::work("rpc_queue");
        transient.durable = false;
        other.declare_queue(&transient).await.unwrap();

        let server = session(&connector).await;
        let err = provision_work_address(&server, "rpc_queue").await.unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }
}
