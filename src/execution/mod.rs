//! # Execution
//!
//! The bounded executor pool that workers are submitted to.

pub mod pool;

pub use pool::{ExecutorPool, ExecutorPoolError};
