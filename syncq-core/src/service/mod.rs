pub mod limit;
pub mod merge;

pub use limit::{LimitCounter, LimitExpiry, LimitPhase, LimitState};
pub use merge::{merge_batch, merge_entry, queue_order, MergeOutcome};
