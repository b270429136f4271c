//! # Workers
//!
//! Execution units submitted to the executor pool.
//!
//! - [`SingleShotWorker`] runs one callable once.
//! - [`BatchWorker`] drains an exhaustible source, checking its [`CancelFlag`] before
//!   every item.
//!
//! Both report through an [`EventSink`]. Failures and panics raised by callables are
//! converted into [`WorkerEvent::Error`] at the worker boundary and every run ends
//! with exactly one [`WorkerEvent::Completed`], emitted after the settle delay.

mod batch;
mod callable;
mod events;
mod single;

pub use batch::{BatchCallable, BatchWorker, CancelFlag};
pub use callable::ItemError;
pub use events::{
    CompletionOutcome, DispatchEvent, EventSink, FaultKind, WorkerEvent, WorkerFault, WorkerKind,
};
pub use single::SingleShotWorker;
