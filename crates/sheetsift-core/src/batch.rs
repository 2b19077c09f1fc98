/// Batch sizing for bounded-memory processing.
///
/// batch_size = ceil(sqrt(n) * log2(n)), clamped to [1, n]. Peak in-flight
/// item count grows like sqrt(n log n) instead of n, while batches stay
/// large enough to amortize per-batch overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub batch_count: usize,
}

pub fn compute_batch_size(total_items: usize) -> BatchPlan {
    if total_items <= 1 {
        return BatchPlan {
            batch_size: 1,
            batch_count: total_items,
        };
    }

    let n = total_items as f64;
    let raw = (n.sqrt() * n.log2()).ceil() as usize;
    let batch_size = raw.clamp(1, total_items);
    let batch_count = total_items.div_ceil(batch_size);

    BatchPlan {
        batch_size,
        batch_count,
    }
}
