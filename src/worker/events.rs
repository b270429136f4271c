use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::WorkerId;

/// Which worker variant produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    SingleShot,
    Batch,
}

/// Classification of a failure observed at the worker boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The callable reported an expected failure for this item
    ItemFailure,
    /// The callable gave up on this item after its own timeout
    Timeout,
    /// The callable returned an unexpected error
    Unexpected,
    /// The callable panicked
    Panic,
}

impl FaultKind {
    /// Whether a batch worker stops draining after this fault
    pub fn terminates_batch(&self) -> bool {
        matches!(self, Self::Unexpected | Self::Panic)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ItemFailure => write!(f, "item_failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unexpected => write!(f, "unexpected"),
            Self::Panic => write!(f, "panic"),
        }
    }
}

/// Failure payload of an error event: kind, human readable message and a
/// diagnostic trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFault {
    pub kind: FaultKind,
    pub message: String,
    pub trace: String,
}

impl fmt::Display for WorkerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// How a worker's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// Every item was attempted (or the single invocation ran)
    Exhausted,
    /// A stop request was observed before the source was exhausted
    Cancelled,
    /// An unexpected fault ended the batch early
    Faulted,
}

/// Events emitted by one worker, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent<R> {
    Result {
        worker_id: WorkerId,
        kind: WorkerKind,
        value: R,
    },
    Error {
        worker_id: WorkerId,
        kind: WorkerKind,
        fault: WorkerFault,
    },
    Completed {
        worker_id: WorkerId,
        kind: WorkerKind,
        outcome: CompletionOutcome,
        processed: usize,
    },
}

impl<R> WorkerEvent<R> {
    pub fn worker_id(&self) -> WorkerId {
        match self {
            Self::Result { worker_id, .. }
            | Self::Error { worker_id, .. }
            | Self::Completed { worker_id, .. } => *worker_id,
        }
    }

    pub fn kind(&self) -> WorkerKind {
        match self {
            Self::Result { kind, .. } | Self::Error { kind, .. } | Self::Completed { kind, .. } => {
                *kind
            }
        }
    }
}

/// Everything the aggregator consumes: dispatch announcements and worker events
///
/// Announcements share the channel with worker events, so a `Dispatched` sent before
/// the workers are submitted is always consumed before their completions.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent<R> {
    Dispatched { tasks: usize, items: u64 },
    Worker(WorkerEvent<R>),
}

/// Producer side of a dispatch event channel
///
/// Sending never blocks. A closed channel means the consumer went away; events are
/// then dropped with a debug log rather than failing the worker.
#[derive(Debug)]
pub struct EventSink<R> {
    sender: mpsc::UnboundedSender<DispatchEvent<R>>,
}

impl<R> Clone for EventSink<R> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<R> EventSink<R> {
    pub fn new(sender: mpsc::UnboundedSender<DispatchEvent<R>>) -> Self {
        Self { sender }
    }

    /// Create a sink together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DispatchEvent<R>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    pub fn dispatched(&self, tasks: usize, items: u64) {
        self.send(DispatchEvent::Dispatched { tasks, items });
    }

    pub fn emit(&self, event: WorkerEvent<R>) {
        self.send(DispatchEvent::Worker(event));
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn send(&self, event: DispatchEvent<R>) {
        if self.sender.send(event).is_err() {
            debug!("Dispatch event consumer dropped, discarding event");
        }
    }
}

/// A worker's obligation to report exactly one `Completed`
///
/// [`complete`](Self::complete) settles it. Dropped unsettled (the worker never ran
/// because its pool closed or its task was torn down), it reports the worker as
/// cancelled with nothing processed.
pub(crate) struct PendingCompletion<R> {
    worker_id: WorkerId,
    kind: WorkerKind,
    events: EventSink<R>,
    settled: bool,
}

impl<R> PendingCompletion<R> {
    pub(crate) fn new(worker_id: WorkerId, kind: WorkerKind, events: EventSink<R>) -> Self {
        Self {
            worker_id,
            kind,
            events,
            settled: false,
        }
    }

    pub(crate) fn emit(&self, event: WorkerEvent<R>) {
        self.events.emit(event);
    }

    pub(crate) fn complete(mut self, outcome: CompletionOutcome, processed: usize) {
        self.settled = true;
        self.events.emit(WorkerEvent::Completed {
            worker_id: self.worker_id,
            kind: self.kind,
            outcome,
            processed,
        });
    }
}

impl<R> Drop for PendingCompletion<R> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(worker_id = %self.worker_id, kind = ?self.kind, "⚠️ WORKER: Dropped before running, reporting as cancelled");
        self.events.emit(WorkerEvent::Completed {
            worker_id: self.worker_id,
            kind: self.kind,
            outcome: CompletionOutcome::Cancelled,
            processed: 0,
        });
    }
}
