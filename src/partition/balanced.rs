use std::ops::Range;

use super::PartitionError;
use crate::models::Batch;

/// Split `items` into `min(fanout, len)` order-preserving batches
///
/// With `q, r = divmod(len, fanout)` the first `r` batches receive `q + 1` items and
/// the rest receive `q`. When there are fewer items than `fanout` every item gets its
/// own batch, and an empty input yields no batches.
pub fn partition_balanced<T>(items: Vec<T>, fanout: usize) -> Result<Vec<Batch<T>>, PartitionError> {
    if fanout == 0 {
        return Err(PartitionError::ZeroFanout);
    }

    let total = items.len();
    let quotient = total / fanout;
    let remainder = total % fanout;
    let batch_count = fanout.min(total);

    let mut source = items.into_iter();
    let batches = (0..batch_count)
        .map(|index| {
            let size = quotient + usize::from(index < remainder);
            Batch::new(source.by_ref().take(size).collect())
        })
        .collect();

    Ok(batches)
}

/// Split `0..total` into exactly `fanout` contiguous, non-overlapping ranges
///
/// The first `total % fanout` ranges are one longer than the rest; trailing ranges
/// are empty when `total < fanout`.
pub fn split_contiguous(total: u64, fanout: usize) -> Result<Vec<Range<u64>>, PartitionError> {
    if fanout == 0 {
        return Err(PartitionError::ZeroFanout);
    }

    let fanout_u64 = fanout as u64;
    let quotient = total / fanout_u64;
    let remainder = total % fanout_u64;

    let mut start = 0;
    let ranges = (0..fanout_u64)
        .map(|index| {
            let len = quotient + u64::from(index < remainder);
            let range = start..start + len;
            start += len;
            range
        })
        .collect();

    Ok(ranges)
}
