use crate::{Address, QueueSpec, Result, Session, SessionState};

/// Declare the client's private reply queue and start consuming it.
///
/// The broker names the queue. It is exclusive to this session's connection
/// and is deleted when the session closes. The session must have its channel
/// open and no consumer yet; afterwards it is `Ready`.
///
/// # Errors
///
/// [`RpcError::Protocol`](crate::RpcError::Protocol) if the broker rejects the
/// declaration or the consumer, or
/// [`RpcError::InvalidState`](crate::RpcError::InvalidState) if the session
/// already has a consumer.
pub async fn provision_reply_address(session: &Session) -> Result<Address> {
    // ---
    // checked up front so a second call leaves no stray queue behind
    session.require("provision_reply_address", &[SessionState::ChannelOpen])?;

    let address = session.declare_queue(&QueueSpec::reply()).await?;
    session.register_consumer(&address).await?;
    Ok(address)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{BrokerConfig, MemoryConnector, MemoryHub, RpcError, SessionState};

    #[tokio::test]
    async fn test_reply_queue_is_private_to_the_session() {
        // ---
        let hub = MemoryHub::new();
        let connector = MemoryConnector::new(hub.clone());
        let session = Session::establish(&connector, &BrokerConfig::default())
            .await
            .unwrap();

        let address = provision_reply_address(&session).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(hub.queue_exists(address.as_str()));

        session.close().await;
        assert!(!hub.queue_exists(address.as_str()));
    }

    #[tokio::test]
    async fn test_one_reply_queue_per_session() {
        // ---
        let hub = MemoryHub::new();
        let connector = MemoryConnector::new(hub.clone());
        let session = Session::establish(&connector, &BrokerConfig::default())
            .await
            .unwrap();

        provision_reply_address(&session).await.unwrap();
        let err = provision_reply_address(&session).await.unwrap_err();
        assert!(matches!(
            err,
            RpcError::InvalidState {
                operation: "provision_reply_address",
                state: SessionState::Ready
            }
        ));
        // the rejected call declared nothing
        assert_eq!(hub.queue_count(), 1);
    }
}
