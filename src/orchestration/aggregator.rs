//! # Progress Aggregator
//!
//! Single consumer of a dispatch event channel. Reconciles item-level progress with
//! task-level completion and announces the end of each session exactly once.
//!
//! ## Counters
//!
//! - `task_count` grows with every `Dispatched` announcement.
//! - `progress_range` grows with the item count of each announcement.
//! - `progress_value` grows by one for every batch-worker result or error.
//! - `completed_tasks` grows by one for every `Completed` event.
//!
//! When `completed_tasks` reaches `task_count`, one `SessionComplete` notification is
//! emitted and all four counters return to zero. The aggregator is the only writer of
//! these counters; readers observe them through a `watch` channel of
//! [`SessionSnapshot`]s.

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::models::WorkerId;
use crate::worker::{CompletionOutcome, DispatchEvent, WorkerEvent, WorkerFault, WorkerKind};

/// Read-only view of the current session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub task_count: usize,
    pub completed_tasks: usize,
    pub progress_value: u64,
    pub progress_range: u64,
}

impl SessionSnapshot {
    /// Whether dispatched tasks are still outstanding
    pub fn is_active(&self) -> bool {
        self.task_count > 0
    }

    /// Item progress in `0.0..=1.0`, if the session has any items
    pub fn fraction(&self) -> Option<f64> {
        (self.progress_range > 0).then(|| self.progress_value as f64 / self.progress_range as f64)
    }
}

/// Counters of the session in progress
#[derive(Debug, Default)]
struct TaskSession {
    task_count: usize,
    completed_tasks: usize,
    progress_value: u64,
    progress_range: u64,
}

impl TaskSession {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            task_count: self.task_count,
            completed_tasks: self.completed_tasks,
            progress_value: self.progress_value,
            progress_range: self.progress_range,
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What the aggregator forwards to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification<R> {
    ItemResult {
        worker_id: WorkerId,
        kind: WorkerKind,
        value: R,
    },
    ItemError {
        worker_id: WorkerId,
        kind: WorkerKind,
        fault: WorkerFault,
    },
    Progress {
        value: u64,
        range: u64,
    },
    WorkerCompleted {
        worker_id: WorkerId,
        kind: WorkerKind,
        outcome: CompletionOutcome,
        processed: usize,
    },
    SessionComplete {
        tasks: usize,
        items_reported: u64,
    },
}

/// Owns the session counters and turns dispatch events into notifications
#[derive(Debug)]
pub struct ProgressAggregator<R> {
    session: TaskSession,
    snapshot: watch::Sender<SessionSnapshot>,
    backlog_warn_depth: usize,
    backlog_warned: bool,
    _results: PhantomData<fn(R)>,
}

impl<R> ProgressAggregator<R> {
    /// Create an aggregator and the receiver its snapshots are published on
    pub fn new(backlog_warn_depth: usize) -> (Self, watch::Receiver<SessionSnapshot>) {
        let (snapshot, receiver) = watch::channel(SessionSnapshot::default());
        let aggregator = Self {
            session: TaskSession::default(),
            snapshot,
            backlog_warn_depth,
            backlog_warned: false,
            _results: PhantomData,
        };
        (aggregator, receiver)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Apply one event and return the notifications it produces, in order
    pub fn apply(&mut self, event: DispatchEvent<R>) -> Vec<SessionNotification<R>> {
        let notifications = match event {
            DispatchEvent::Dispatched { tasks, items } => {
                self.on_dispatched(tasks, items);
                Vec::new()
            }
            DispatchEvent::Worker(event) => self.on_worker_event(event),
        };

        self.snapshot.send_replace(self.session.snapshot());
        notifications
    }

    /// Consume events until every sender is gone, forwarding notifications
    ///
    /// A dropped notification receiver does not stop aggregation; counters stay
    /// accurate for snapshot readers.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<DispatchEvent<R>>,
        notifications: mpsc::UnboundedSender<SessionNotification<R>>,
    ) {
        info!("📊 AGGREGATOR: Consuming dispatch events");

        while let Some(event) = events.recv().await {
            self.check_backlog(events.len());

            for notification in self.apply(event) {
                if notifications.send(notification).is_err() {
                    debug!("📊 AGGREGATOR: Notification receiver dropped");
                }
            }
        }

        info!(
            outstanding_tasks = self.session.task_count - self.session.completed_tasks,
            "📊 AGGREGATOR: Event channel closed"
        );
    }

    fn on_dispatched(&mut self, tasks: usize, items: u64) {
        if tasks == 0 {
            debug!("📊 AGGREGATOR: Ignoring empty dispatch announcement");
            return;
        }

        self.session.task_count += tasks;
        self.session.progress_range += items;
        debug!(
            task_count = self.session.task_count,
            progress_range = self.session.progress_range,
            "📊 AGGREGATOR: Session extended"
        );
    }

    fn on_worker_event(&mut self, event: WorkerEvent<R>) -> Vec<SessionNotification<R>> {
        match event {
            WorkerEvent::Result {
                worker_id,
                kind,
                value,
            } => {
                let mut out = vec![SessionNotification::ItemResult {
                    worker_id,
                    kind,
                    value,
                }];
                out.extend(self.advance_progress(kind));
                out
            }
            WorkerEvent::Error {
                worker_id,
                kind,
                fault,
            } => {
                let mut out = vec![SessionNotification::ItemError {
                    worker_id,
                    kind,
                    fault,
                }];
                out.extend(self.advance_progress(kind));
                out
            }
            WorkerEvent::Completed {
                worker_id,
                kind,
                outcome,
                processed,
            } => self.on_completed(worker_id, kind, outcome, processed),
        }
    }

    /// Single-shot results carry no item progress
    fn advance_progress(&mut self, kind: WorkerKind) -> Option<SessionNotification<R>> {
        if kind != WorkerKind::Batch {
            return None;
        }

        let session = &mut self.session;
        if session.progress_value < session.progress_range {
            session.progress_value += 1;
        } else {
            warn!(
                progress_value = session.progress_value,
                progress_range = session.progress_range,
                "📊 AGGREGATOR: Item report beyond progress range"
            );
        }

        Some(SessionNotification::Progress {
            value: session.progress_value,
            range: session.progress_range,
        })
    }

    fn on_completed(
        &mut self,
        worker_id: WorkerId,
        kind: WorkerKind,
        outcome: CompletionOutcome,
        processed: usize,
    ) -> Vec<SessionNotification<R>> {
        if self.session.task_count == 0 {
            warn!(worker_id = %worker_id, "📊 AGGREGATOR: Completion outside of any session ignored");
            return Vec::new();
        }

        self.session.completed_tasks += 1;
        let mut out = vec![SessionNotification::WorkerCompleted {
            worker_id,
            kind,
            outcome,
            processed,
        }];

        if self.session.completed_tasks == self.session.task_count {
            let tasks = self.session.task_count;
            let items_reported = self.session.progress_value;
            self.session.reset();

            info!(
                tasks = tasks,
                items_reported = items_reported,
                "🏁 AGGREGATOR: Session complete"
            );
            out.push(SessionNotification::SessionComplete {
                tasks,
                items_reported,
            });
        }

        out
    }

    fn check_backlog(&mut self, depth: usize) {
        if depth >= self.backlog_warn_depth {
            if !self.backlog_warned {
                warn!(
                    depth = depth,
                    threshold = self.backlog_warn_depth,
                    "📊 AGGREGATOR: Event backlog is growing"
                );
                self.backlog_warned = true;
            }
        } else {
            self.backlog_warned = false;
        }
    }
}
