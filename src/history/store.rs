use crate::bus::{Endpoint, Message};
use crate::db::{DbResult, KvStore};
use crate::lock::HistoryLock;
use log::{debug, info};

use super::types::{HistoryEntry, HistoryRecord, HistoryStatus};

/// Storage key of the history list
pub const HISTORY_KEY: &str = "history";

/// Default capacity of the history list
pub const HISTORY_MAX: usize = 100;

/// Apply `entry` to `list` in place and return the resulting record.
///
/// - unknown id: new record at the head (`pending`, `ts = now` unless given)
/// - known id: field-by-field merge that never replaces a value with nothing
///   and never moves a `done` record back to `pending`
///
/// The list is truncated to `max` afterwards, dropping the oldest records.
pub fn merge_entry(
    list: &mut Vec<HistoryRecord>,
    entry: HistoryEntry,
    now: i64,
    max: usize,
) -> HistoryRecord {
    let merged = match list.iter_mut().find(|r| r.id == entry.id) {
        Some(current) => {
            if current.url.is_none() && entry.url.is_some() {
                current.url = entry.url;
            }
            if let Some(ts) = entry.ts {
                if ts > current.ts {
                    current.ts = ts;
                }
            }
            if let Some(status) = entry.status {
                if !current.status.is_done() {
                    current.status = status;
                }
            }
            if entry.size.is_some() {
                current.size = entry.size;
            }
            current.clone()
        }
        None => {
            let record = HistoryRecord {
                id: entry.id,
                url: entry.url,
                ts: entry.ts.unwrap_or(now),
                status: entry.status.unwrap_or_default(),
                size: entry.size,
            };
            list.insert(0, record.clone());
            record
        }
    };

    list.truncate(max);
    merged
}

/// Mutex-protected history list on top of key-value persistence
#[derive(Clone)]
pub struct HistoryStore {
    kv: KvStore,
    lock: HistoryLock,
    notifier: Option<Endpoint>,
    max: usize,
}

impl HistoryStore {
    pub fn new(kv: KvStore, lock: HistoryLock, max: usize) -> Self {
        Self {
            kv,
            lock,
            notifier: None,
            max,
        }
    }

    /// Announce every upsert as `ADD_HISTORY` through `endpoint`
    pub fn with_notifier(mut self, endpoint: Endpoint) -> Self {
        self.notifier = Some(endpoint);
        self
    }

    async fn load(&self) -> DbResult<Vec<HistoryRecord>> {
        Ok(self.kv.get_json(HISTORY_KEY).await?.unwrap_or_default())
    }

    async fn save(&self, list: &[HistoryRecord]) -> DbResult<()> {
        self.kv.set_json(HISTORY_KEY, &list).await
    }

    /// Insert or merge a record
    pub async fn upsert(&self, entry: HistoryEntry) -> DbResult<HistoryRecord> {
        let guard = self.lock.acquire().await;
        let mut list = self.load().await?;
        let now = chrono::Utc::now().timestamp_millis();
        let record = merge_entry(&mut list, entry, now, self.max);
        self.save(&list).await?;
        guard.release();

        debug!("history upsert: {} -> {}", record.id, record.status);
        if let Some(endpoint) = &self.notifier {
            endpoint.send(Message::AddHistory {
                id: record.id.clone(),
                url: record.url.clone(),
                ts: record.ts,
                status: record.status,
                size: record.size,
            });
        }
        Ok(record)
    }

    /// Mark a task done; `false` when the id is unknown or already done,
    /// in which case nothing is written
    pub async fn mark_done(&self, id: &str) -> DbResult<bool> {
        let guard = self.lock.acquire().await;
        let mut list = self.load().await?;
        let changed = match list.iter_mut().find(|r| r.id == id) {
            Some(record) if !record.status.is_done() => {
                record.status = HistoryStatus::Done;
                true
            }
            _ => false,
        };
        if changed {
            self.save(&list).await?;
            info!("history: {} done", id);
        }
        guard.release();
        Ok(changed)
    }

    /// Current history, newest first
    pub async fn list(&self) -> DbResult<Vec<HistoryRecord>> {
        let _guard = self.lock.acquire().await;
        self.load().await
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<HistoryRecord>> {
        Ok(self.list().await?.into_iter().find(|r| r.id == id))
    }
}
