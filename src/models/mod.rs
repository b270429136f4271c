//! # Work Model
//!
//! The data that flows through the dispatcher: work items, command descriptors,
//! batches and the identifiers of batches and workers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Unique identifier of one worker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", &self.0.simple().to_string()[..8])
    }
}

/// Unique identifier of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", &self.0.simple().to_string()[..8])
    }
}

/// A device command: an operation name, the device it targets and its arguments
///
/// Operations are opaque to the dispatcher; the callable that receives the
/// descriptor decides what `"http"`, `"set"` or `"work"` mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub operation: String,
    pub target: IpAddr,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

impl CommandDescriptor {
    pub fn new(operation: impl Into<String>, target: IpAddr) -> Self {
        Self {
            operation: operation.into(),
            target,
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, argument: impl Into<serde_json::Value>) -> Self {
        self.arguments.push(argument.into());
        self
    }
}

/// One unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WorkItem {
    /// A network address to probe
    Address(IpAddr),
    /// A command to run against one device
    Command(CommandDescriptor),
}

impl WorkItem {
    /// The device address this item concerns
    pub fn target(&self) -> IpAddr {
        match self {
            Self::Address(address) => *address,
            Self::Command(command) => command.target,
        }
    }
}

impl From<IpAddr> for WorkItem {
    fn from(address: IpAddr) -> Self {
        Self::Address(address)
    }
}

impl From<CommandDescriptor> for WorkItem {
    fn from(command: CommandDescriptor) -> Self {
        Self::Command(command)
    }
}

/// An ordered group of items assigned to exactly one worker
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub id: BatchId,
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            id: BatchId::new(),
            items,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
