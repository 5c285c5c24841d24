//! Merge & dedup of queue entries into a room's ordered queue
//!
//! Every transport funnels observed entries through [`merge_entry`]. The queue
//! is kept newest-first; an entry whose song reference and timestamp already
//! appear is a re-delivery and is dropped.

use std::cmp::Ordering;

use crate::models::QueueEntry;

/// Result of offering one entry to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted { index: usize },
    Duplicate,
}

impl MergeOutcome {
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}

/// Queue order: newer `time_added` first. Distinct entries sharing a timestamp
/// fall back to adder name, then song bytes, so every device settles on the
/// same order whatever the delivery order was.
#[must_use]
pub fn queue_order(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.time_added
        .cmp(&a.time_added)
        .then_with(|| a.adder_name.cmp(&b.adder_name))
        .then_with(|| a.song.cmp(&b.song))
}

/// Insert `candidate` before the first entry it sorts ahead of, or append it.
pub fn merge_entry(queue: &mut Vec<QueueEntry>, candidate: QueueEntry) -> MergeOutcome {
    if queue.iter().any(|existing| existing.is_same_delivery(&candidate)) {
        return MergeOutcome::Duplicate;
    }

    let index = queue
        .iter()
        .position(|existing| queue_order(&candidate, existing) == Ordering::Less)
        .unwrap_or(queue.len());
    queue.insert(index, candidate);
    MergeOutcome::Inserted { index }
}

/// Merge a batch, returning the entries that were actually accepted
pub fn merge_batch<I>(queue: &mut Vec<QueueEntry>, candidates: I) -> Vec<QueueEntry>
where
    I: IntoIterator<Item = QueueEntry>,
{
    let mut accepted = Vec::new();
    for candidate in candidates {
        let kept = candidate.clone();
        if merge_entry(queue, candidate).is_inserted() {
            accepted.push(kept);
        }
    }
    accepted
}
