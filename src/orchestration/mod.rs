//! # Orchestration
//!
//! Caller-side coordination of batch dispatch.
//!
//! ## Core Components
//!
//! - **Dispatcher**: partitions work, builds workers and submits them to the pool
//! - **ProgressAggregator**: single consumer of worker events, owner of the session
//!   counters
//! - **Bootstrap**: wires pool, registry, channels and the aggregator task from
//!   configuration
//!
//! ```text
//! Dispatcher ──Dispatched──┐
//!                          ├─► event channel ─► ProgressAggregator ─► notifications
//! BatchWorker / SingleShot ┘                           │
//!                                                      └─► watch<SessionSnapshot>
//! ```

pub mod aggregator;
pub mod bootstrap;
pub mod dispatcher;

pub use aggregator::{ProgressAggregator, SessionNotification, SessionSnapshot};
pub use bootstrap::{bootstrap_dispatch, bootstrap_with_registry, DispatchStatus, DispatchSystem};
pub use dispatcher::{Dispatch, DispatchSummary, Dispatcher};
