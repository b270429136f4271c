use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::callable::{invoke_guarded, ItemError};
use super::events::{CompletionOutcome, EventSink, PendingCompletion, WorkerEvent, WorkerKind};
use crate::models::WorkerId;
use crate::registry::{WorkerHandle, WorkerRegistry};

/// Shared callable applied to every item of a batch
pub type BatchCallable<T, R> = Arc<dyn Fn(T) -> Result<R, ItemError> + Send + Sync>;

/// Monotonic stop request shared between a worker and the registry
///
/// Once set it is never reset. The store uses `Release` and the drain loop reads
/// with `Acquire`, so a worker that observes the request starts no further item.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Removes the worker from the registry exactly once, whether the worker ran to
/// completion or was dropped without running
struct Registration {
    id: WorkerId,
    registry: Arc<WorkerRegistry>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

/// Drains one exhaustible item source, one item at a time
///
/// The worker registers itself with the registry on construction so that a stop
/// broadcast issued after construction but before the worker runs still reaches it.
/// A worker dropped without running (its pool closed while it waited for a slot)
/// reports `Completed` as cancelled with nothing processed, then unregisters.
///
/// ```rust
/// use dispatch_core::registry::WorkerRegistry;
/// use dispatch_core::worker::{BatchWorker, CompletionOutcome, EventSink};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let registry = Arc::new(WorkerRegistry::new());
/// let (sink, _events) = EventSink::channel();
/// let worker = BatchWorker::new(vec![1u32, 2, 3], |n: u32| Ok(n * 2), sink, registry.clone(), Duration::ZERO);
/// assert_eq!(registry.active_count(), 1);
///
/// assert_eq!(worker.run(), CompletionOutcome::Exhausted);
/// assert_eq!(registry.active_count(), 0);
/// ```
pub struct BatchWorker<T, R> {
    id: WorkerId,
    source: Box<dyn Iterator<Item = T> + Send>,
    call: BatchCallable<T, R>,
    settle_delay: Duration,
    cancel: CancelFlag,
    // declared before `registration` so an unrun worker reports before it unregisters
    completion: PendingCompletion<R>,
    registration: Registration,
}

impl<T, R> BatchWorker<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn new<I, F>(
        items: I,
        call: F,
        events: EventSink<R>,
        registry: Arc<WorkerRegistry>,
        settle_delay: Duration,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        F: Fn(T) -> Result<R, ItemError> + Send + Sync + 'static,
    {
        Self::with_shared_callable(items, Arc::new(call), events, registry, settle_delay)
    }

    /// Build a worker around a callable shared with other workers of the same dispatch
    pub fn with_shared_callable<I>(
        items: I,
        call: BatchCallable<T, R>,
        events: EventSink<R>,
        registry: Arc<WorkerRegistry>,
        settle_delay: Duration,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let id = WorkerId::new();
        let cancel = CancelFlag::new();
        registry.register(WorkerHandle::new(id, cancel.clone()));

        Self {
            id,
            source: Box::new(items.into_iter()),
            call,
            settle_delay,
            cancel,
            completion: PendingCompletion::new(id, WorkerKind::Batch, events),
            registration: Registration { id, registry },
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Request a stop; the item in flight, if any, still finishes
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Flag that outlives [`run`](Self::run), for stopping this worker alone
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Drain the source, emitting one event per attempted item, then `Completed`
    ///
    /// Blocks the calling thread; submit it to the executor pool.
    pub fn run(self) -> CompletionOutcome {
        let Self {
            id,
            mut source,
            call,
            settle_delay,
            cancel,
            completion,
            registration,
        } = self;

        debug!(worker_id = %id, "⚙️ WORKER: Batch drain starting");

        let mut processed = 0usize;
        let outcome = loop {
            if cancel.is_cancelled() {
                break CompletionOutcome::Cancelled;
            }

            let Some(item) = source.next() else {
                break CompletionOutcome::Exhausted;
            };
            processed += 1;

            match invoke_guarded(|| call(item)) {
                Ok(value) => completion.emit(WorkerEvent::Result {
                    worker_id: id,
                    kind: WorkerKind::Batch,
                    value,
                }),
                Err(fault) => {
                    let terminal = fault.kind.terminates_batch();
                    if terminal {
                        warn!(worker_id = %id, kind = %fault.kind, "⚠️ WORKER: Fault ends batch early: {}", fault.message);
                    }
                    completion.emit(WorkerEvent::Error {
                        worker_id: id,
                        kind: WorkerKind::Batch,
                        fault,
                    });
                    if terminal {
                        break CompletionOutcome::Faulted;
                    }
                }
            }
        };

        std::thread::sleep(settle_delay);

        info!(
            worker_id = %id,
            outcome = ?outcome,
            processed = processed,
            "✅ WORKER: Batch drain finished"
        );
        completion.complete(outcome, processed);

        drop(registration);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{DispatchEvent, FaultKind};
    use anyhow::anyhow;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain<R>(receiver: &mut UnboundedReceiver<DispatchEvent<R>>) -> Vec<WorkerEvent<R>> {
        let mut events = Vec::new();
        while let Ok(DispatchEvent::Worker(event)) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_drains_in_order_then_completes() {
        let registry = Arc::new(WorkerRegistry::new());
        let (sink, mut receiver) = EventSink::channel();
        let worker = BatchWorker::new(
            vec![1u32, 2, 3],
            |n: u32| Ok(n * 10),
            sink,
            registry.clone(),
            Duration::ZERO,
        );
        let id = worker.id();
        assert!(registry.is_registered(&id));

        assert_eq!(worker.run(), CompletionOutcome::Exhausted);

        let events = drain(&mut receiver);
        let values: Vec<u32> = events
            .iter()
            .filter_map(|event| match event {
                WorkerEvent::Result { value, .. } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![10, 20, 30]);
        assert_eq!(
            events.last(),
            Some(&WorkerEvent::Completed {
                worker_id: id,
                kind: WorkerKind::Batch,
                outcome: CompletionOutcome::Exhausted,
                processed: 3,
            })
        );
        assert!(!registry.is_registered(&id));
    }

    #[test]
    fn test_item_failures_do_not_end_the_batch() {
        let registry = Arc::new(WorkerRegistry::new());
        let (sink, mut receiver) = EventSink::channel();
        let worker = BatchWorker::new(
            vec![1u32, 2, 3, 4],
            |n: u32| {
                if n % 2 == 0 {
                    Err(ItemError::TimedOut(Duration::from_millis(1000)))
                } else {
                    Ok(n)
                }
            },
            sink,
            registry,
            Duration::ZERO,
        );

        assert_eq!(worker.run(), CompletionOutcome::Exhausted);

        let events = drain(&mut receiver);
        let errors = events
            .iter()
            .filter(|event| matches!(event, WorkerEvent::Error { fault, .. } if fault.kind == FaultKind::Timeout))
            .count();
        assert_eq!(errors, 2);
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn test_unexpected_fault_stops_remaining_items() {
        let registry = Arc::new(WorkerRegistry::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let (sink, mut receiver) = EventSink::<u32>::channel();

        let worker = BatchWorker::new(
            1u32..=5,
            move |n: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                if n == 2 {
                    Err(ItemError::from(anyhow!("device returned garbage")))
                } else {
                    Ok(n)
                }
            },
            sink,
            registry.clone(),
            Duration::ZERO,
        );

        assert_eq!(worker.run(), CompletionOutcome::Faulted);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let events = drain(&mut receiver);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[2],
            WorkerEvent::Completed {
                outcome: CompletionOutcome::Faulted,
                processed: 2,
                ..
            }
        ));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_panic_is_contained() {
        let registry = Arc::new(WorkerRegistry::new());
        let (sink, mut receiver) = EventSink::<u32>::channel();
        let worker = BatchWorker::new(
            vec![7u32, 8],
            |_n: u32| -> Result<u32, ItemError> { panic!("probe crashed") },
            sink,
            registry,
            Duration::ZERO,
        );

        assert_eq!(worker.run(), CompletionOutcome::Faulted);
        let events = drain(&mut receiver);
        assert!(matches!(
            &events[0],
            WorkerEvent::Error { fault, .. } if fault.kind == FaultKind::Panic && fault.message == "probe crashed"
        ));
    }

    #[test]
    fn test_stop_before_run_attempts_nothing() {
        let registry = Arc::new(WorkerRegistry::new());
        let (sink, mut receiver) = EventSink::channel();
        let worker = BatchWorker::new(vec![1u32, 2], |n: u32| Ok(n), sink, registry, Duration::ZERO);

        worker.stop();
        assert_eq!(worker.run(), CompletionOutcome::Cancelled);

        let events = drain(&mut receiver);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            WorkerEvent::Completed {
                outcome: CompletionOutcome::Cancelled,
                processed: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_stop_mid_batch_finishes_in_flight_item() {
        let registry = Arc::new(WorkerRegistry::new());
        let (sink, mut receiver) = EventSink::channel();
        let flag_slot: Arc<parking_lot::Mutex<Option<CancelFlag>>> = Arc::default();
        let slot = flag_slot.clone();

        let worker = BatchWorker::new(
            0u32..100,
            move |n: u32| {
                if n == 3 {
                    if let Some(flag) = slot.lock().as_ref() {
                        flag.cancel();
                    }
                }
                Ok(n)
            },
            sink,
            registry,
            Duration::ZERO,
        );
        *flag_slot.lock() = Some(worker.cancel_flag());

        assert_eq!(worker.run(), CompletionOutcome::Cancelled);
        let events = drain(&mut receiver);
        // items 0..=3 attempted, the fourth one completing after the stop request
        assert_eq!(events.len(), 5);
        assert!(matches!(
            events[4],
            WorkerEvent::Completed { processed: 4, .. }
        ));
    }

    #[test]
    fn test_dropping_unrun_worker_completes_and_unregisters() {
        let registry = Arc::new(WorkerRegistry::new());
        let (sink, mut receiver) = EventSink::<u32>::channel();
        let worker = BatchWorker::new(vec![1u32, 2], |n: u32| Ok(n), sink, registry.clone(), Duration::ZERO);
        let id = worker.id();
        assert_eq!(registry.active_count(), 1);

        drop(worker);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.stats().total_unregistered, 1);
        assert_eq!(
            drain(&mut receiver),
            vec![WorkerEvent::Completed {
                worker_id: id,
                kind: WorkerKind::Batch,
                outcome: CompletionOutcome::Cancelled,
                processed: 0,
            }]
        );
    }

    #[test]
    fn test_run_emits_exactly_one_completion() {
        let registry = Arc::new(WorkerRegistry::new());
        let (sink, mut receiver) = EventSink::<u32>::channel();
        BatchWorker::new(vec![1u32], |n: u32| Ok(n), sink, registry, Duration::ZERO).run();

        let completions = drain(&mut receiver)
            .into_iter()
            .filter(|event| matches!(event, WorkerEvent::Completed { .. }))
            .count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_cancel_flag_is_monotonic() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        flag.cancel();
        assert!(flag.clone().is_cancelled());
    }
}
