//! # Worker Registry
//!
//! Tracks every live batch worker and broadcasts stop requests to them.
//!
//! ## Overview
//!
//! Membership in the registry *is* the subscription to the stop broadcast: a batch
//! worker registers its [`WorkerHandle`] when it is constructed and is removed exactly
//! once when it finishes or is dropped. Single-shot workers and the connection worker
//! never register.
//!
//! ## Ordering
//!
//! `register`, `unregister` and `broadcast_stop` all run under one lock. A broadcast
//! therefore acts on a snapshot taken at call time: every worker whose registration
//! completed before the broadcast acquired the lock is cancelled, and a worker that
//! registers afterwards is not.
//!
//! ## Usage
//!
//! ```rust
//! use dispatch_core::models::WorkerId;
//! use dispatch_core::registry::{WorkerHandle, WorkerRegistry};
//! use dispatch_core::worker::CancelFlag;
//!
//! let registry = WorkerRegistry::new();
//! let flag = CancelFlag::new();
//! let id = WorkerId::new();
//! registry.register(WorkerHandle::new(id, flag.clone()));
//!
//! assert_eq!(registry.broadcast_stop(), 1);
//! assert!(flag.is_cancelled());
//!
//! assert!(registry.unregister(&id));
//! assert!(!registry.unregister(&id));
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::info;

use crate::logging::log_registry_operation;
use crate::models::WorkerId;
use crate::worker::CancelFlag;

/// Registry entry for one live batch worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub cancel: CancelFlag,
    pub registered_at: DateTime<Utc>,
}

impl WorkerHandle {
    pub fn new(id: WorkerId, cancel: CancelFlag) -> Self {
        Self {
            id,
            cancel,
            registered_at: Utc::now(),
        }
    }
}

/// Point-in-time registry counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub active_workers: usize,
    pub total_registered: u64,
    pub total_unregistered: u64,
    pub stop_broadcasts: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    handles: HashMap<WorkerId, WorkerHandle>,
    total_registered: u64,
    total_unregistered: u64,
    stop_broadcasts: u64,
}

/// Set of live batch workers
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    state: Mutex<RegistryState>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<WorkerRegistry>> = OnceLock::new();

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-lifetime registry for callers that do not inject their own
    pub fn global() -> Arc<WorkerRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(WorkerRegistry::new()))
            .clone()
    }

    /// Add a worker to the broadcast set
    pub fn register(&self, handle: WorkerHandle) {
        let mut state = self.state.lock();
        let worker_id = handle.id.to_string();
        state.handles.insert(handle.id, handle);
        state.total_registered += 1;

        log_registry_operation("register", Some(&worker_id), state.handles.len(), "registered");
    }

    /// Remove a worker; returns whether it was present. Never fails.
    pub fn unregister(&self, id: &WorkerId) -> bool {
        let mut state = self.state.lock();
        let removed = state.handles.remove(id).is_some();
        if removed {
            state.total_unregistered += 1;
        }

        log_registry_operation(
            "unregister",
            Some(&id.to_string()),
            state.handles.len(),
            if removed { "unregistered" } else { "not_registered" },
        );
        removed
    }

    /// Set the cancel flag of every registered worker
    ///
    /// Fire-and-forget: returns the number of workers signalled without waiting for
    /// any of them to finish. Safe to call repeatedly and with no workers registered.
    pub fn broadcast_stop(&self) -> usize {
        let mut state = self.state.lock();
        for handle in state.handles.values() {
            handle.cancel.cancel();
        }
        state.stop_broadcasts += 1;
        let signalled = state.handles.len();

        info!(signalled = signalled, "🛑 REGISTRY: Stop broadcast to registered workers");
        log_registry_operation("broadcast_stop", None, signalled, "broadcast");
        signalled
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().handles.len()
    }

    pub fn is_registered(&self, id: &WorkerId) -> bool {
        self.state.lock().handles.contains_key(id)
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            active_workers: state.handles.len(),
            total_registered: state.total_registered,
            total_unregistered: state.total_unregistered,
            stop_broadcasts: state.stop_broadcasts,
        }
    }
}
