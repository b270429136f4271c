#![allow(dead_code)]

pub mod strategies;

use dispatch_core::config::{DispatchConfig, ExecutionConfig};
use dispatch_core::messaging::ConnectionEvent;
use dispatch_core::orchestration::SessionNotification;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Upper bound for any single wait in integration tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration with a short settle delay so tests stay fast
pub fn fast_config(max_concurrency: usize, partition_fanout: usize) -> DispatchConfig {
    DispatchConfig {
        execution: ExecutionConfig {
            max_concurrency,
            partition_fanout,
            settle_delay_ms: 5,
            ..ExecutionConfig::default()
        },
        ..DispatchConfig::default()
    }
}

/// Collect notifications up to and including the next `SessionComplete`
pub async fn collect_session<R>(
    notifications: &mut UnboundedReceiver<SessionNotification<R>>,
) -> Vec<SessionNotification<R>> {
    let mut collected = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(notification) = notifications.recv().await {
            let done = matches!(notification, SessionNotification::SessionComplete { .. });
            collected.push(notification);
            if done {
                break;
            }
        }
    })
    .await
    .expect("session did not complete in time");
    collected
}

/// Wait for the next connection event matching `predicate`, returning everything
/// seen on the way
pub async fn wait_for_event(
    events: &mut UnboundedReceiver<ConnectionEvent>,
    predicate: impl Fn(&ConnectionEvent) -> bool,
) -> Vec<ConnectionEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            let matched = predicate(&event);
            seen.push(event);
            if matched {
                break;
            }
        }
    })
    .await
    .expect("expected connection event not received");
    seen
}
