use std::time::Duration;
use tracing::{debug, warn};

use super::callable::{invoke_guarded, ItemError};
use super::events::{CompletionOutcome, EventSink, PendingCompletion, WorkerEvent, WorkerKind};
use crate::models::WorkerId;

/// Runs one callable exactly once
///
/// Emits one `Result` or one `Error`, then after the settle delay exactly one
/// `Completed`. A worker dropped without running reports `Completed` as cancelled.
/// Single-shot workers are not registered with the registry and are not affected by a
/// stop broadcast.
pub struct SingleShotWorker<R> {
    id: WorkerId,
    call: Box<dyn FnOnce() -> Result<R, ItemError> + Send>,
    completion: PendingCompletion<R>,
    settle_delay: Duration,
}

impl<R: Send + 'static> SingleShotWorker<R> {
    pub fn new<F>(call: F, events: EventSink<R>, settle_delay: Duration) -> Self
    where
        F: FnOnce() -> Result<R, ItemError> + Send + 'static,
    {
        let id = WorkerId::new();
        Self {
            id,
            call: Box::new(call),
            completion: PendingCompletion::new(id, WorkerKind::SingleShot, events),
            settle_delay,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Execute the callable; blocks the calling thread for the invocation and the
    /// settle delay
    pub fn run(self) {
        let Self {
            id,
            call,
            completion,
            settle_delay,
        } = self;

        debug!(worker_id = %id, "⚙️ WORKER: Single-shot invocation starting");

        match invoke_guarded(call) {
            Ok(value) => completion.emit(WorkerEvent::Result {
                worker_id: id,
                kind: WorkerKind::SingleShot,
                value,
            }),
            Err(fault) => {
                warn!(worker_id = %id, kind = %fault.kind, "⚠️ WORKER: Single-shot invocation failed: {}", fault.message);
                completion.emit(WorkerEvent::Error {
                    worker_id: id,
                    kind: WorkerKind::SingleShot,
                    fault,
                });
            }
        }

        std::thread::sleep(settle_delay);

        completion.complete(CompletionOutcome::Exhausted, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{DispatchEvent, FaultKind};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain<R>(receiver: &mut UnboundedReceiver<DispatchEvent<R>>) -> Vec<WorkerEvent<R>> {
        let mut events = Vec::new();
        while let Ok(DispatchEvent::Worker(event)) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_result_then_completion() {
        let (sink, mut receiver) = EventSink::channel();
        let worker = SingleShotWorker::new(|| Ok("flow: 2.64 GB".to_string()), sink, Duration::ZERO);
        let id = worker.id();
        worker.run();

        let events = drain(&mut receiver);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], WorkerEvent::Result { value, .. } if value == "flow: 2.64 GB"));
        assert_eq!(
            events[1],
            WorkerEvent::Completed {
                worker_id: id,
                kind: WorkerKind::SingleShot,
                outcome: CompletionOutcome::Exhausted,
                processed: 1,
            }
        );
    }

    #[test]
    fn test_error_replaces_result() {
        let (sink, mut receiver) = EventSink::<u32>::channel();
        SingleShotWorker::new(|| Err(ItemError::failed("not a number")), sink, Duration::ZERO).run();

        let events = drain(&mut receiver);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            WorkerEvent::Error { fault, .. } if fault.kind == FaultKind::ItemFailure
        ));
        assert!(matches!(events[1], WorkerEvent::Completed { .. }));
    }

    #[test]
    fn test_panic_still_completes() {
        let (sink, mut receiver) = EventSink::<u32>::channel();
        SingleShotWorker::new(|| panic!("boom"), sink, Duration::ZERO).run();

        let events = drain(&mut receiver);
        assert!(matches!(
            &events[0],
            WorkerEvent::Error { fault, .. } if fault.kind == FaultKind::Panic
        ));
        assert!(matches!(events[1], WorkerEvent::Completed { .. }));
    }

    #[test]
    fn test_dropped_before_running_reports_cancelled() {
        let (sink, mut receiver) = EventSink::<u32>::channel();
        let worker = SingleShotWorker::new(|| Ok(1), sink, Duration::ZERO);
        let id = worker.id();
        drop(worker);

        assert_eq!(
            drain(&mut receiver),
            vec![WorkerEvent::Completed {
                worker_id: id,
                kind: WorkerKind::SingleShot,
                outcome: CompletionOutcome::Cancelled,
                processed: 0,
            }]
        );
    }

    #[test]
    fn test_settle_delay_precedes_completion() {
        let (sink, _receiver) = EventSink::channel();
        let started = std::time::Instant::now();
        SingleShotWorker::new(|| Ok(()), sink, Duration::from_millis(40)).run();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
