use thiserror::Error;

use crate::config::ConfigurationError;
use crate::execution::ExecutorPoolError;
use crate::messaging::MessagingError;
use crate::partition::PartitionError;

/// Top-level error for every fallible operation exposed by the crate.
///
/// Worker-level failures never show up here: they are converted into
/// [`WorkerEvent::Error`](crate::worker::WorkerEvent) at the worker boundary.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("Executor pool error: {0}")]
    Pool(#[from] ExecutorPoolError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
