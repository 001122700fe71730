//! The usage-recording queue (spec §4.4): buffers usage records in
//! memory, flushes them to the store in batches, and falls back to a
//! cache-backed dead-letter queue when the store is unreachable.

mod queue;
mod stats;

pub use queue::{UsageQueue, UsageQueueConfig};
pub use stats::{BatchStat, QueueStats, StatsTracker};
