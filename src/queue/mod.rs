//! Durable write queue: captured mutations awaiting replay.
//!
//! Entries are owned exclusively by the store until deleted. The sync engine
//! is the only component that moves them through their states.

mod entry;
mod store;

pub use entry::{EnqueueOptions, EnqueueReceipt, EntryChanges, QueueEntry, QueueStatus};
pub use store::WriteQueueStore;
