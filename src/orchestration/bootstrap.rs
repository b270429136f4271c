//! # Dispatch Bootstrap
//!
//! Wires a complete dispatch system from validated configuration: executor pool,
//! registry, event channel, dispatcher and the aggregator task consuming the channel.
//!
//! ## Lifecycle
//!
//! - [`bootstrap_dispatch`] validates the configuration and spawns the aggregator.
//! - [`DispatchSystem::status`] reports pool, registry and session state.
//! - [`DispatchSystem::shutdown`] stops registered workers, closes the pool and waits
//!   for the aggregator to drain the last events.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::aggregator::{ProgressAggregator, SessionNotification, SessionSnapshot};
use super::dispatcher::Dispatcher;
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::execution::ExecutorPool;
use crate::logging::log_error;
use crate::registry::{RegistryStats, WorkerRegistry};
use crate::worker::EventSink;

/// Running dispatch system handle
pub struct DispatchSystem<R> {
    pub dispatcher: Dispatcher<R>,
    /// Notifications forwarded by the aggregator
    pub notifications: mpsc::UnboundedReceiver<SessionNotification<R>>,
    /// Latest session counters
    pub session: watch::Receiver<SessionSnapshot>,
    pool: ExecutorPool,
    registry: Arc<WorkerRegistry>,
    aggregator_task: JoinHandle<()>,
}

/// Point-in-time system status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchStatus {
    pub pool_capacity: usize,
    pub active_executors: usize,
    pub available_slots: usize,
    pub pool_closed: bool,
    pub registry: RegistryStats,
    pub session: SessionSnapshot,
}

/// Build a dispatch system with its own registry
///
/// Must be called from within a tokio runtime.
pub fn bootstrap_dispatch<R: Send + 'static>(config: &DispatchConfig) -> Result<DispatchSystem<R>> {
    bootstrap_with_registry(config, Arc::new(WorkerRegistry::new()))
}

/// Build a dispatch system around an existing registry, e.g. [`WorkerRegistry::global`]
pub fn bootstrap_with_registry<R: Send + 'static>(
    config: &DispatchConfig,
    registry: Arc<WorkerRegistry>,
) -> Result<DispatchSystem<R>> {
    config.validate()?;
    let execution = &config.execution;

    let pool = ExecutorPool::new(execution.max_concurrency)?;
    let (events, event_receiver) = EventSink::channel();
    let (notify_sender, notifications) = mpsc::unbounded_channel();
    let (aggregator, session) = ProgressAggregator::new(execution.event_backlog_warn_depth);

    let aggregator_task = tokio::spawn(aggregator.run(event_receiver, notify_sender));
    let dispatcher = Dispatcher::new(pool.clone(), registry.clone(), events, execution.clone());

    info!(
        max_concurrency = execution.max_concurrency,
        partition_fanout = execution.partition_fanout,
        range_fanout = execution.range_fanout,
        settle_delay_ms = execution.settle_delay_ms,
        "🚀 BOOTSTRAP: Dispatch system ready"
    );

    Ok(DispatchSystem {
        dispatcher,
        notifications,
        session,
        pool,
        registry,
        aggregator_task,
    })
}

impl<R: Send + 'static> DispatchSystem<R> {
    pub fn pool(&self) -> &ExecutorPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn status(&self) -> DispatchStatus {
        DispatchStatus {
            pool_capacity: self.pool.capacity(),
            active_executors: self.pool.active_count(),
            available_slots: self.pool.available_slots(),
            pool_closed: self.pool.is_closed(),
            registry: self.registry.stats(),
            session: *self.session.borrow(),
        }
    }

    /// Stop registered workers, refuse new submissions and wait for the aggregator
    ///
    /// Returns the notification receiver so the caller can read what was forwarded
    /// during shutdown. Clones of the dispatcher keep the event channel open; drop
    /// them first or this waits for them.
    pub async fn shutdown(self) -> mpsc::UnboundedReceiver<SessionNotification<R>> {
        let Self {
            dispatcher,
            notifications,
            pool,
            aggregator_task,
            ..
        } = self;

        let signalled = dispatcher.stop_all();
        pool.close();
        drop(dispatcher);
        info!(signalled = signalled, "🛑 BOOTSTRAP: Dispatch shutdown requested");

        if let Err(e) = aggregator_task.await {
            warn!("Aggregator task ended abnormally");
            log_error("aggregator", "shutdown", &e.to_string(), None);
        }

        notifications
    }
}
