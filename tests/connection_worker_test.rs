mod common;

use common::{wait_for_event, TEST_TIMEOUT};
use dispatch_core::execution::ExecutorPool;
use dispatch_core::messaging::{
    ConnectionEvent, ConnectionSettings, ConnectionState, ConnectionWorker, LoopbackBroker,
    MessagingError, QoS,
};
use dispatch_core::registry::WorkerRegistry;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn settings(client_id: &str) -> ConnectionSettings {
    ConnectionSettings::new("loopback", 1883)
        .unwrap()
        .with_client_id(client_id)
}

/// Start a worker on its own task and wait until it reports `Connected`
async fn connected_worker(
    broker: &LoopbackBroker,
    client_id: &str,
) -> (
    ConnectionWorker<LoopbackBroker>,
    UnboundedReceiver<ConnectionEvent>,
    tokio::task::JoinHandle<Result<(), MessagingError>>,
) {
    let (worker, mut events) = ConnectionWorker::new(broker.clone());
    let runner = worker.clone();
    let settings = settings(client_id);
    let session = tokio::spawn(async move { runner.start(settings).await });

    let seen = wait_for_event(&mut events, |e| *e == ConnectionEvent::Connected).await;
    assert_eq!(seen, vec![ConnectionEvent::Connected]);
    assert_eq!(worker.state(), ConnectionState::Connected);
    (worker, events, session)
}

#[tokio::test]
async fn test_subscribe_publish_receive() {
    let broker = LoopbackBroker::new();
    let (worker, mut events, session) = connected_worker(&broker, "meter-1").await;

    worker.subscribe("meters/+/reading", QoS::AtLeastOnce);
    worker.subscribe("alarms/#", QoS::ExactlyOnce);
    wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::Subscribed { topic, .. } if topic == "alarms/#")
    })
    .await;
    assert_eq!(
        worker.subscriptions(),
        vec![
            ("alarms/#".to_string(), QoS::ExactlyOnce),
            ("meters/+/reading".to_string(), QoS::AtLeastOnce),
        ]
    );

    worker.publish("meters/7/reading", "42.5", QoS::AtMostOnce);
    let seen = wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::MessageReceived { .. })
    })
    .await;
    assert!(seen.contains(&ConnectionEvent::MessagePublished {
        topic: "meters/7/reading".to_string()
    }));
    assert_eq!(
        seen.last(),
        Some(&ConnectionEvent::MessageReceived {
            topic: "meters/7/reading".to_string(),
            payload: "42.5".to_string(),
        })
    );

    worker.stop();
    let seen = wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert_eq!(
        seen.last(),
        Some(&ConnectionEvent::Disconnected { unexpected: false })
    );
    session.await.unwrap().unwrap();
    assert_eq!(worker.state(), ConnectionState::Disconnected);
    assert!(worker.subscriptions().is_empty());
    assert!(!broker.is_connected("meter-1"));
}

#[tokio::test]
async fn test_operations_before_connect_are_no_ops() {
    let broker = LoopbackBroker::new();
    let (worker, mut events) = ConnectionWorker::new(broker.clone());

    worker.subscribe("a/b", QoS::AtMostOnce);
    worker.publish("a/b", "ignored", QoS::AtMostOnce);
    worker.stop();

    assert_eq!(worker.state(), ConnectionState::Disconnected);
    assert!(events.try_recv().is_err());
    assert_eq!(broker.client_count(), 0);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let broker = LoopbackBroker::new();
    let (worker, _events, session) = connected_worker(&broker, "dup").await;

    let result = worker.start(settings("dup")).await;
    assert!(matches!(
        result,
        Err(MessagingError::AlreadyActive {
            state: ConnectionState::Connected
        })
    ));

    worker.stop();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_refused_connection_reports_connect_failed_only() {
    let broker = LoopbackBroker::new().with_credentials("emqx", "public");
    let (worker, mut events) = ConnectionWorker::new(broker.clone());

    let result = worker.start(settings("no-credentials")).await;
    assert!(matches!(
        result,
        Err(MessagingError::ConnectionRefused { code: 5 })
    ));
    assert_eq!(worker.state(), ConnectionState::Failed);

    let event = events.try_recv().unwrap();
    assert!(matches!(event, ConnectionEvent::ConnectFailed { .. }));
    assert!(events.try_recv().is_err());

    // a fresh start from Failed is allowed
    let authorized = settings("with-credentials")
        .with_credentials(Some("emqx".to_string()), Some("public".to_string()));
    let runner = worker.clone();
    let session = tokio::spawn(async move { runner.start(authorized).await });
    wait_for_event(&mut events, |e| *e == ConnectionEvent::Connected).await;

    worker.stop();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unreachable_broker() {
    let broker = LoopbackBroker::new();
    broker.set_unreachable(true);
    let (worker, mut events) = ConnectionWorker::new(broker);

    assert!(matches!(
        worker.start(settings("c1")).await,
        Err(MessagingError::Broker(_))
    ));
    assert!(matches!(
        events.try_recv(),
        Ok(ConnectionEvent::ConnectFailed { .. })
    ));

    worker.stop();
    assert_eq!(worker.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_broker_drop_is_an_unexpected_disconnect() {
    let broker = LoopbackBroker::new();
    let (worker, mut events, session) = connected_worker(&broker, "flaky").await;

    assert!(broker.drop_client("flaky"));
    let seen = wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert_eq!(seen, vec![ConnectionEvent::Disconnected { unexpected: true }]);
    session.await.unwrap().unwrap();
    assert_eq!(worker.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_invalid_payload_is_a_session_error() {
    let broker = LoopbackBroker::new();
    let (worker, mut events, session) = connected_worker(&broker, "reader").await;

    assert!(broker.inject("reader", "raw/bytes", vec![0xff, 0xfe, 0x00]));
    let seen = wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::ErrorOccurred { .. })).await;
    assert_eq!(seen.len(), 1);
    assert_eq!(worker.state(), ConnectionState::Connected);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, ConnectionEvent::ConnectFailed { .. })));

    worker.stop();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_runs_in_pool_slot_and_ignores_registry_broadcast() {
    let broker = LoopbackBroker::new();
    let pool = ExecutorPool::new(2).unwrap();
    let registry = WorkerRegistry::new();
    let (worker, mut events) = ConnectionWorker::new(broker);

    let runner = worker.clone();
    let session = pool.submit_async(async move { runner.start(settings("pooled")).await });
    wait_for_event(&mut events, |e| *e == ConnectionEvent::Connected).await;
    assert_eq!(pool.available_slots(), 1);

    assert_eq!(registry.broadcast_stop(), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(worker.state(), ConnectionState::Connected);

    worker.stop();
    tokio::time::timeout(TEST_TIMEOUT, session)
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(pool.available_slots(), 2);
}

#[tokio::test]
async fn test_stop_while_connecting_ends_disconnected_silently() {
    let broker = LoopbackBroker::new();
    broker.withhold_acknowledgements(true);
    let (worker, mut events) = ConnectionWorker::new(broker.clone());
    let mut states = worker.state_changes();

    let runner = worker.clone();
    let session = tokio::spawn(async move { runner.start(settings("slow-ack")).await });
    tokio::time::timeout(
        TEST_TIMEOUT,
        states.wait_for(|state| *state == ConnectionState::Connecting),
    )
    .await
    .unwrap()
    .unwrap();

    worker.stop();
    tokio::time::timeout(TEST_TIMEOUT, session)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(worker.state(), ConnectionState::Disconnected);
    assert!(events.try_recv().is_err());
    assert_eq!(broker.client_count(), 0);

    // the worker is reusable once acknowledgements flow again
    broker.withhold_acknowledgements(false);
    let runner = worker.clone();
    let session = tokio::spawn(async move { runner.start(settings("slow-ack")).await });
    wait_for_event(&mut events, |e| *e == ConnectionEvent::Connected).await;
    worker.stop();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_abandoned_session_returns_to_disconnected() {
    let broker = LoopbackBroker::new();
    let (worker, mut events, session) = connected_worker(&broker, "aborted").await;
    assert!(broker.is_connected("aborted"));

    session.abort();
    assert!(session.await.unwrap_err().is_cancelled());

    assert_eq!(worker.state(), ConnectionState::Disconnected);
    assert!(worker.subscriptions().is_empty());
    assert!(!broker.is_connected("aborted"));

    worker.stop();
    assert_eq!(worker.state(), ConnectionState::Disconnected);

    let runner = worker.clone();
    let restarted = tokio::spawn(async move { runner.start(settings("aborted")).await });
    wait_for_event(&mut events, |e| *e == ConnectionEvent::Connected).await;
    assert!(broker.is_connected("aborted"));

    worker.stop();
    restarted.await.unwrap().unwrap();
}
