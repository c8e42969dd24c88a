use std::ops::Range;

/// The records of `items` a data worker owns.
///
/// Shards are contiguous, disjoint, cover every item and differ in length by at most one. A
/// `worker_id` past the last worker owns nothing, and zero workers means one.
pub fn shard<T>(items: &[T], worker_id: usize, num_workers: usize) -> &[T] {
    &items[shard_range(items.len(), worker_id, num_workers)]
}

/// The positions of the shard of `worker_id` among `total` items, see `shard`.
pub fn shard_range(total: usize, worker_id: usize, num_workers: usize) -> Range<usize> {
    let num_workers = num_workers.max(1);
    if worker_id >= num_workers {
        return total..total;
    }

    let (base, longer) = (total / num_workers, total % num_workers);
    let start = worker_id * base + worker_id.min(longer);
    let len = base + usize::from(worker_id < longer);

    start..start + len
}
