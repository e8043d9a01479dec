use bytes::Bytes;
use std::time::{Duration, Instant};

use broker_rpc::{
    //
    provision_work_address,
    Address,
    BrokerConfig,
    Credentials,
    MemoryConnector,
    MemoryHub,
    MessageProperties,
    QueueSpec,
    Result,
    RetryConfig,
    RpcError,
    Session,
    SessionState,
};

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        multiplier: 2.0,
        initial_delay: Duration::from_millis(40),
        max_delay: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn test_timeout_boundary() -> Result<()> {
    // ---
    let connector = MemoryConnector::new(MemoryHub::new());
    let session = Session::establish(&connector, &BrokerConfig::default()).await?;
    let work = provision_work_address(&session, "quiet").await?;

    for millis in [20, 100, 250] {
        let bound = Duration::from_millis(millis);
        let start = Instant::now();
        let err = session.consume(&work, bound).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, RpcError::Timeout));
        assert!(elapsed >= bound, "{bound:?}: returned after only {elapsed:?}");
        assert!(
            elapsed < bound + Duration::from_millis(50),
            "{bound:?}: returned after {elapsed:?}"
        );
    }

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn test_work_queue_provisioning_is_idempotent() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let connector = MemoryConnector::new(hub.clone());

    let first = Session::establish(&connector, &BrokerConfig::default()).await?;
    let address = provision_work_address(&first, "rpc_queue").await?;
    first.close().await;

    let producer = Session::establish(&connector, &BrokerConfig::default()).await?;
    broker_rpc::provision_reply_address(&producer).await?;
    producer
        .publish(&address, MessageProperties::default(), Bytes::from_static(b"queued"))
        .await?;
    producer.close().await;

    // a restarted server finds the same queue with its backlog intact
    assert_eq!(hub.queue_depth("rpc_queue"), 1);
    let second = Session::establish(&connector, &BrokerConfig::default()).await?;
    let again = provision_work_address(&second, "rpc_queue").await?;
    assert_eq!(address, again);

    let delivery = second.consume(&again, Duration::from_millis(100)).await?;
    assert_eq!(delivery.payload, Bytes::from_static(b"queued"));

    second.close().await;
    Ok(())
}

#[tokio::test]
async fn test_mismatched_redeclare_is_a_protocol_error() -> Result<()> {
    // ---
    let connector = MemoryConnector::new(MemoryHub::new());
    let session = Session::establish(&connector, &BrokerConfig::default()).await?;

    session.declare_queue(&QueueSpec::work("jobs")).await?;
    let mut flipped = QueueSpec::work("jobs");
    flipped.auto_delete = true;

    let err = session.declare_queue(&flipped).await.unwrap_err();
    assert!(matches!(err, RpcError::Protocol(_)));

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn test_teardown_is_terminal() -> Result<()> {
    // ---
    let connector = MemoryConnector::new(MemoryHub::new());
    let session = Session::establish(&connector, &BrokerConfig::default()).await?;
    let work = provision_work_address(&session, "rpc_queue").await?;

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);

    let err = session
        .publish(&work, MessageProperties::default(), Bytes::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::SessionClosed));

    let err = session
        .consume(&work, Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::SessionClosed));

    let err = session.declare_queue(&QueueSpec::reply()).await.unwrap_err();
    assert!(matches!(err, RpcError::SessionClosed));
    Ok(())
}

#[tokio::test]
async fn test_out_of_order_operations_are_rejected() -> Result<()> {
    // ---
    let connector = MemoryConnector::new(MemoryHub::new());
    let session = Session::new(broker_rpc::Connector::broker(&connector));

    let err = session
        .authenticate(&Credentials::default(), "/")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpcError::InvalidState {
            operation: "authenticate",
            state: SessionState::Unconnected
        }
    ));

    let err = session
        .consume(&Address::from("rpc_queue"), Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::InvalidState { .. }));
    assert_eq!(session.state(), SessionState::Unconnected);
    Ok(())
}

#[tokio::test]
async fn test_retry_rides_out_a_restarting_broker() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let connector = MemoryConnector::new(hub.clone());
    hub.refuse_next_connects(2);

    let start = Instant::now();
    let session = Session::establish(&connector, &BrokerConfig::default().with_retry(fast_retry(3))).await?;

    // two backoffs: 40ms and 80ms, each jittered by 25%
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(90), "no backoff: {elapsed:?}");
    assert_eq!(session.state(), SessionState::ChannelOpen);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn test_retry_exhaustion_reports_attempts() {
    // ---
    let hub = MemoryHub::new();
    let connector = MemoryConnector::new(hub.clone());
    hub.set_reachable(false);

    let err = Session::establish(&connector, &BrokerConfig::default().with_retry(fast_retry(2)))
        .await
        .unwrap_err();

    match err {
        RpcError::Connect { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, RpcError::Transport(_)));
        }
        other => panic!("expected Connect, got {other:?}"),
    }
}

#[tokio::test]
async fn test_without_retry_the_first_failure_is_final() {
    // ---
    let hub = MemoryHub::new();
    let connector = MemoryConnector::new(hub.clone());
    hub.refuse_next_connects(1);

    let err = Session::establish(&connector, &BrokerConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)));
}

#[tokio::test]
async fn test_bad_credentials_are_not_retried() {
    // ---
    let hub = MemoryHub::new();
    let connector = MemoryConnector::new(hub.clone());

    let config = BrokerConfig::default()
        .with_credentials(Credentials::new("guest", "nope"))
        .with_retry(fast_retry(5));

    let start = Instant::now();
    let err = Session::establish(&connector, &config).await.unwrap_err();

    assert!(matches!(err, RpcError::Auth(_)));
    assert!(start.elapsed() < Duration::from_millis(30), "auth failure was retried");
}
