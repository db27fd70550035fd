//! Durable, bounded task history
//!
//! Records live newest-first under the `history` key. Every read-modify-write
//! goes through the process-wide [`HistoryLock`](crate::lock::HistoryLock).

mod store;
mod types;

pub use store::{merge_entry, HistoryStore, HISTORY_KEY, HISTORY_MAX};
pub use types::{HistoryEntry, HistoryRecord, HistoryStatus};
