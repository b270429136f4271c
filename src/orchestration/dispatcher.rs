//! # Dispatcher
//!
//! Caller-side glue between partitioning, workers, the registry and the executor
//! pool. Every dispatch announces its task and item counts on the event channel
//! before any worker is submitted, so the aggregator always learns about a session
//! before it sees that session's completions.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ExecutionConfig;
use crate::error::Result;
use crate::execution::{ExecutorPool, ExecutorPoolError};
use crate::logging::log_dispatch_operation;
use crate::models::WorkerId;
use crate::partition::{partition_balanced, HostRange};
use crate::registry::WorkerRegistry;
use crate::worker::{BatchCallable, BatchWorker, EventSink, ItemError, SingleShotWorker};

/// What one dispatch call submitted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub tasks: usize,
    pub items: u64,
    pub worker_ids: Vec<WorkerId>,
}

/// Submitted workers of one dispatch call
#[derive(Debug)]
pub struct Dispatch {
    pub summary: DispatchSummary,
    handles: Vec<JoinHandle<std::result::Result<(), ExecutorPoolError>>>,
}

impl Dispatch {
    fn empty() -> Self {
        Self {
            summary: DispatchSummary::default(),
            handles: Vec::new(),
        }
    }

    /// Wait until every submitted worker has finished
    pub async fn wait(self) -> std::result::Result<(), ExecutorPoolError> {
        for handle in self.handles {
            handle.await.map_err(|e| ExecutorPoolError::TaskFailed {
                reason: e.to_string(),
            })??;
        }
        Ok(())
    }
}

/// Splits work, wraps it in workers and submits them to the pool
pub struct Dispatcher<R> {
    pool: ExecutorPool,
    registry: Arc<WorkerRegistry>,
    events: EventSink<R>,
    settings: ExecutionConfig,
}

impl<R> Clone for Dispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<R: Send + 'static> Dispatcher<R> {
    pub fn new(
        pool: ExecutorPool,
        registry: Arc<WorkerRegistry>,
        events: EventSink<R>,
        settings: ExecutionConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            events,
            settings,
        }
    }

    /// Timeout callers should apply inside their item callables
    pub fn item_timeout(&self) -> Duration {
        self.settings.item_timeout()
    }

    /// Partition `items` into balanced batches and run one batch worker per batch
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch_items<T, F>(&self, items: Vec<T>, call: F) -> Result<Dispatch>
    where
        T: Send + 'static,
        F: Fn(T) -> std::result::Result<R, ItemError> + Send + Sync + 'static,
    {
        self.ensure_open()?;

        let total = items.len();
        let batches = partition_balanced(items, self.settings.partition_fanout)?;
        if batches.is_empty() {
            warn!("📦 DISPATCH: Nothing to dispatch");
            return Ok(Dispatch::empty());
        }

        let call: BatchCallable<T, R> = Arc::new(call);
        let sources: Vec<_> = batches.into_iter().map(|batch| batch.items).collect();
        let dispatch = self.submit_batches(sources, call, total as u64);

        log_dispatch_operation(
            "dispatch_items",
            dispatch.summary.tasks,
            total,
            "submitted",
            None,
        );
        Ok(dispatch)
    }

    /// Split each host range into contiguous slices and run one batch worker per
    /// non-empty slice
    pub fn dispatch_host_ranges<F>(&self, ranges: &[HostRange], call: F) -> Result<Dispatch>
    where
        F: Fn(Ipv4Addr) -> std::result::Result<R, ItemError> + Send + Sync + 'static,
    {
        self.ensure_open()?;

        let mut slices = Vec::new();
        for range in ranges {
            slices.extend(
                range
                    .split(self.settings.range_fanout)?
                    .into_iter()
                    .filter(|slice| !slice.is_empty()),
            );
        }

        if slices.is_empty() {
            warn!("📦 DISPATCH: Host ranges contain no addressable hosts");
            return Ok(Dispatch::empty());
        }

        let total: u64 = slices.iter().map(|slice| slice.len() as u64).sum();
        let call: BatchCallable<Ipv4Addr, R> = Arc::new(call);
        let dispatch = self.submit_batches(slices, call, total);

        let details = ranges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        log_dispatch_operation(
            "dispatch_host_ranges",
            dispatch.summary.tasks,
            total as usize,
            "submitted",
            Some(&details),
        );
        Ok(dispatch)
    }

    /// Run one single-shot worker
    pub fn dispatch_single<F>(&self, call: F) -> Result<Dispatch>
    where
        F: FnOnce() -> std::result::Result<R, ItemError> + Send + 'static,
    {
        self.ensure_open()?;

        self.events.dispatched(1, 0);
        let worker = SingleShotWorker::new(call, self.events.clone(), self.settings.settle_delay());
        let worker_id = worker.id();
        let handle = self.pool.submit_blocking(move || worker.run());

        log_dispatch_operation("dispatch_single", 1, 0, "submitted", None);
        Ok(Dispatch {
            summary: DispatchSummary {
                tasks: 1,
                items: 0,
                worker_ids: vec![worker_id],
            },
            handles: vec![handle],
        })
    }

    /// Broadcast a stop request to every registered batch worker
    pub fn stop_all(&self) -> usize {
        let signalled = self.registry.broadcast_stop();
        log_dispatch_operation("stop_all", signalled, 0, "stop_requested", None);
        signalled
    }

    fn ensure_open(&self) -> std::result::Result<(), ExecutorPoolError> {
        if self.pool.is_closed() {
            return Err(ExecutorPoolError::Closed);
        }
        Ok(())
    }

    fn submit_batches<T, I>(&self, sources: Vec<I>, call: BatchCallable<T, R>, items: u64) -> Dispatch
    where
        T: Send + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let tasks = sources.len();
        self.events.dispatched(tasks, items);

        let mut worker_ids = Vec::with_capacity(tasks);
        let mut handles = Vec::with_capacity(tasks);
        for source in sources {
            let worker = BatchWorker::with_shared_callable(
                source,
                call.clone(),
                self.events.clone(),
                self.registry.clone(),
                self.settings.settle_delay(),
            );
            worker_ids.push(worker.id());
            handles.push(self.pool.submit_blocking(move || {
                worker.run();
            }));
        }

        info!(
            tasks = tasks,
            items = items,
            "📦 DISPATCH: Batch workers submitted"
        );
        Dispatch {
            summary: DispatchSummary {
                tasks,
                items,
                worker_ids,
            },
            handles,
        }
    }
}
