use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use thiserror::Error;

use super::events::{FaultKind, WorkerFault};

/// Failure reported by a work callable
///
/// `Failed` and `TimedOut` are item-level failures: a batch worker reports them and
/// moves on to the next item. `Unexpected` is a worker fault that ends the batch.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ItemError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn fault_kind(&self) -> FaultKind {
        match self {
            Self::Failed(_) => FaultKind::ItemFailure,
            Self::TimedOut(_) => FaultKind::Timeout,
            Self::Unexpected(_) => FaultKind::Unexpected,
        }
    }

    fn into_fault(self) -> WorkerFault {
        let kind = self.fault_kind();
        let message = self.to_string();
        let trace = match &self {
            // Debug output carries the cause chain and, when enabled, the backtrace
            Self::Unexpected(error) => format!("{error:?}"),
            _ => message.clone(),
        };
        WorkerFault {
            kind,
            message,
            trace,
        }
    }
}

/// Run a callable, converting both error returns and panics into a [`WorkerFault`]
pub(crate) fn invoke_guarded<R>(call: impl FnOnce() -> Result<R, ItemError>) -> Result<R, WorkerFault> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(error.into_fault()),
        Err(payload) => Err(WorkerFault {
            kind: FaultKind::Panic,
            message: panic_message(payload.as_ref()),
            trace: Backtrace::capture().to_string(),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "callable panicked with a non-string payload".to_string()
    }
}
