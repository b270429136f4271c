//! # Work Partitioning
//!
//! Splits work into balanced batches for a fixed-size executor pool. Two modes:
//!
//! - [`partition_balanced`]: a materialized list of N items split into at most K
//!   batches whose sizes differ by at most one, preserving item order.
//! - [`HostRange::split`]: an IPv4 host range split into exactly F lazy, contiguous
//!   [`AddressSlice`]s. Slices never materialize the address space.
//!
//! ```rust
//! use dispatch_core::partition::{partition_balanced, HostRange};
//!
//! let batches = partition_balanced((0..23).collect::<Vec<_>>(), 10).unwrap();
//! let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
//! assert_eq!(sizes, vec![3, 3, 3, 2, 2, 2, 2, 2, 2, 2]);
//!
//! let range = HostRange::parse("192.168.1.0/24").unwrap();
//! let slices = range.split(5).unwrap();
//! assert_eq!(slices.iter().map(|s| s.len()).sum::<usize>(), 254);
//! ```

mod balanced;
mod host_range;

pub use balanced::{partition_balanced, split_contiguous};
pub use host_range::{AddressSlice, HostRange};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("Fan-out must be at least 1")]
    ZeroFanout,

    #[error("Invalid network '{input}': {reason}")]
    InvalidNetwork { input: String, reason: String },
}

impl PartitionError {
    pub(crate) fn invalid_network(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNetwork {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
