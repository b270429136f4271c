#![allow(clippy::doc_markdown)] // Allow technical terms like MQTT, EMQX in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Dispatch Core
//!
//! Bounded-concurrency batch dispatch with cooperative cancellation, progress
//! aggregation and a persistent publish/subscribe connection worker.
//!
//! ## Overview
//!
//! Many short-lived, independent units of work (network probes, per-device commands,
//! message publishes) are split into balanced batches and drained by workers running
//! on a fixed-size executor pool. Workers report every result, error and completion
//! on a typed channel; a single aggregator reconciles them into session progress and
//! announces the end of each session exactly once. A registry of live batch workers
//! lets a caller stop all in-flight work with one broadcast.
//!
//! ## Module Organization
//!
//! - [`partition`] - Balanced batches and contiguous host-range slices
//! - [`worker`] - Single-shot and batch workers, their events and fault model
//! - [`registry`] - Live batch workers and the stop broadcast
//! - [`execution`] - Fixed-capacity executor pool
//! - [`orchestration`] - Dispatcher, progress aggregator and bootstrap
//! - [`messaging`] - Connection worker and the broker boundary
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dispatch_core::config::DispatchConfig;
//! use dispatch_core::orchestration::{bootstrap_dispatch, SessionNotification};
//! use dispatch_core::partition::HostRange;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut system = bootstrap_dispatch::<String>(&DispatchConfig::default())?;
//!
//! let range = HostRange::parse("192.168.1.0/24")?;
//! system
//!     .dispatcher
//!     .dispatch_host_ranges(&[range], |host| Ok(format!("{host} is up")))?;
//!
//! while let Some(notification) = system.notifications.recv().await {
//!     if let SessionNotification::SessionComplete { items_reported, .. } = notification {
//!         println!("{items_reported} hosts probed");
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod partition;
pub mod registry;
pub mod worker;

pub use config::{BrokerConfig, ConfigManager, DispatchConfig, ExecutionConfig};
pub use error::{DispatchError, Result};
pub use execution::ExecutorPool;
pub use messaging::{ConnectionEvent, ConnectionSettings, ConnectionState, ConnectionWorker};
pub use models::{Batch, CommandDescriptor, WorkItem, WorkerId};
pub use orchestration::{
    bootstrap_dispatch, Dispatcher, ProgressAggregator, SessionNotification, SessionSnapshot,
};
pub use partition::{partition_balanced, HostRange};
pub use registry::WorkerRegistry;
pub use worker::{BatchWorker, CancelFlag, ItemError, SingleShotWorker, WorkerEvent};
