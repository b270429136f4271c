//! Fixed-capacity executor pool
//!
//! Every submission acquires one permit from a semaphore sized to the pool capacity
//! before its body starts, so at most `capacity` bodies run at once. Synchronous
//! worker bodies run on tokio's blocking pool; async bodies (the connection worker)
//! run as ordinary tasks and hold their permit for their whole lifetime.
//!
//! ```rust
//! use dispatch_core::execution::ExecutorPool;
//!
//! # tokio_test::block_on(async {
//! let pool = ExecutorPool::new(2).unwrap();
//!
//! let sum = pool.submit_blocking(|| (1..=10u32).sum::<u32>());
//! assert_eq!(sum.await.unwrap().unwrap(), 55);
//!
//! pool.close();
//! let rejected = pool.submit_async(async { "never runs" });
//! assert!(rejected.await.unwrap().is_err());
//! # });
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Executor pool errors
#[derive(Debug, thiserror::Error)]
pub enum ExecutorPoolError {
    #[error("Invalid pool capacity {capacity}: at least one slot is required")]
    InvalidCapacity { capacity: usize },

    #[error("Executor pool is closed")]
    Closed,

    #[error("Submitted task failed: {reason}")]
    TaskFailed { reason: String },
}

/// Bounded pool of concurrent executors
///
/// Cloning is cheap; clones share the same slots.
#[derive(Debug, Clone)]
pub struct ExecutorPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    active: Arc<AtomicUsize>,
}

/// Counts a running body for the duration of its execution
struct ActiveSlot(Arc<AtomicUsize>);

impl ActiveSlot {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active.clone())
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutorPool {
    pub fn new(capacity: usize) -> Result<Self, ExecutorPoolError> {
        if capacity == 0 {
            return Err(ExecutorPoolError::InvalidCapacity { capacity });
        }

        info!(capacity = capacity, "🏊 POOL: Executor pool created");
        Ok(Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Run a synchronous body on the blocking pool once a slot is free
    ///
    /// Must be called from within a tokio runtime. The returned handle resolves when
    /// the body finishes; dropping it does not cancel the body.
    pub fn submit_blocking<F, O>(&self, body: F) -> JoinHandle<Result<O, ExecutorPoolError>>
    where
        F: FnOnce() -> O + Send + 'static,
        O: Send + 'static,
    {
        let permits = self.permits.clone();
        let active = self.active.clone();

        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ExecutorPoolError::Closed)?;
            let _slot = ActiveSlot::enter(&active);
            debug!("🏊 POOL: Blocking body acquired a slot");

            tokio::task::spawn_blocking(body)
                .await
                .map_err(|e| ExecutorPoolError::TaskFailed {
                    reason: e.to_string(),
                })
        })
    }

    /// Run an async body once a slot is free, holding the slot until it returns
    pub fn submit_async<Fut>(&self, body: Fut) -> JoinHandle<Result<Fut::Output, ExecutorPoolError>>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let permits = self.permits.clone();
        let active = self.active.clone();

        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ExecutorPoolError::Closed)?;
            let _slot = ActiveSlot::enter(&active);
            debug!("🏊 POOL: Async body acquired a slot");

            Ok(body.await)
        })
    }

    /// Refuse further submissions; bodies already holding a slot keep running
    pub fn close(&self) {
        if !self.permits.is_closed() {
            warn!(active = self.active_count(), "🏊 POOL: Closing executor pool");
            self.permits.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of bodies currently running
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            ExecutorPool::new(0),
            Err(ExecutorPoolError::InvalidCapacity { capacity: 0 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_capacity() {
        let pool = ExecutorPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit_blocking(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_async_body_holds_slot() {
        let pool = ExecutorPool::new(1).unwrap();
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let long_lived = pool.submit_async(async move {
            let _ = released.await;
            "done"
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while pool.available_slots() != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(pool.active_count(), 1);

        release.send(()).unwrap();
        assert_eq!(long_lived.await.unwrap().unwrap(), "done");
        assert_eq!(pool.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_submissions() {
        let pool = ExecutorPool::new(1).unwrap();
        pool.close();
        assert!(pool.is_closed());

        let result = pool.submit_blocking(|| 1).await.unwrap();
        assert!(matches!(result, Err(ExecutorPoolError::Closed)));
    }
}
