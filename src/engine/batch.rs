//! Rolling batch arithmetic.

/// Returns the batch size for `total` hosts at `percentage` percent.
///
/// The size is `floor(total * percentage / 100)`, never less than one.
/// Percentages above 100 are treated as 100.
#[must_use]
pub fn batch_size(total: usize, percentage: u8) -> usize {
    if total == 0 {
        return 0;
    }
    let percentage = usize::from(percentage.min(100));
    (total * percentage / 100).max(1)
}

/// Splits hosts into consecutive batches, preserving order.
///
/// The last batch holds the remainder.
#[must_use]
pub fn rollout_batches<T>(hosts: &[T], percentage: u8) -> Vec<&[T]> {
    let size = batch_size(hosts.len(), percentage);
    if size == 0 {
        return Vec::new();
    }
    hosts.chunks(size).collect()
}
