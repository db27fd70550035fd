use crate::bus::{Endpoint, Message};
use crate::db::DbResult;
use crate::history::HistoryStore;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use super::cache::ProgressCache;
use super::types::{BroadcastMark, ProgressSample, ThrottlePolicy};

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Sink for decoded samples: cache, throttled broadcast, completion
#[derive(Clone)]
pub struct ProgressRelay {
    cache: ProgressCache,
    history: HistoryStore,
    notifier: Endpoint,
    throttle: ThrottlePolicy,
    last_broadcast: Arc<Mutex<HashMap<String, BroadcastMark>>>,
    completed: Arc<Mutex<HashSet<String>>>,
}

impl ProgressRelay {
    pub fn new(
        cache: ProgressCache,
        history: HistoryStore,
        notifier: Endpoint,
        throttle: ThrottlePolicy,
    ) -> Self {
        Self {
            cache,
            history,
            notifier,
            throttle,
            last_broadcast: Arc::new(Mutex::new(HashMap::new())),
            completed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn cache(&self) -> &ProgressCache {
        &self.cache
    }

    /// Handle one sample for `id`.
    ///
    /// The cache is always written. The first completion sample marks the
    /// history record done, even when the cache write failed; later ones do
    /// not touch history again.
    pub async fn handle_sample(&self, id: &str, sample: ProgressSample) -> DbResult<()> {
        let cached = self.cache.write(id, &sample).await;

        let complete = sample.is_complete();
        if complete && locked(&self.completed).insert(id.to_string()) {
            if let Err(e) = self.history.mark_done(id).await {
                locked(&self.completed).remove(id);
                return Err(e);
            }
        }
        cached?;

        let now = Instant::now();
        let broadcast = {
            let mut last = locked(&self.last_broadcast);
            let go = self.throttle.should_broadcast(last.get(id), now, &sample);
            if complete {
                last.remove(id);
            } else if go {
                last.insert(
                    id.to_string(),
                    BroadcastMark {
                        at: now,
                        downloaded: sample.downloaded,
                    },
                );
            }
            go
        };

        if broadcast {
            self.notifier.send(Message::DownloadProgress {
                id: id.to_string(),
                downloaded: sample.downloaded,
                total: sample.total,
                speed: sample.speed,
            });
        } else {
            debug!("progress {}: broadcast throttled", id);
        }
        Ok(())
    }

    /// Drop the cached sample and the completion guard of a finished task
    pub async fn purge(&self, id: &str) -> DbResult<()> {
        self.cache.purge(id).await?;
        locked(&self.completed).remove(id);
        Ok(())
    }

    /// Forget broadcast state of a task whose stream went away
    pub fn release(&self, id: &str) {
        locked(&self.last_broadcast).remove(id);
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        locked(&self.last_broadcast).len()
    }
}

#[cfg(test)]
mod tests {
    use super::ProgressRelay;
    use crate::bus::{Message, MessageBus};
    use crate::db::KvStore;
    use crate::history::{HistoryEntry, HistoryStatus, HistoryStore, HISTORY_MAX};
    use crate::lock::HistoryLock;
    use crate::progress::{ProgressCache, ProgressSample, ThrottlePolicy};
    use std::time::Duration;

    fn relay(throttle: ThrottlePolicy) -> (ProgressRelay, HistoryStore, MessageBus) {
        let kv = KvStore::in_memory();
        let bus = MessageBus::new();
        let history = HistoryStore::new(kv.clone(), HistoryLock::new(), HISTORY_MAX);
        let relay = ProgressRelay::new(
            ProgressCache::new(kv),
            history.clone(),
            bus.endpoint(),
            throttle,
        );
        (relay, history, bus)
    }

    #[tokio::test]
    async fn partial_sample_updates_cache_but_not_history() {
        let (relay, history, _bus) = relay(ThrottlePolicy::default());
        history.upsert(HistoryEntry::new("A")).await.unwrap();

        relay
            .handle_sample("A", ProgressSample::new(50, 100, 10))
            .await
            .unwrap();

        let cached = relay.cache().read("A").await.unwrap().unwrap();
        assert_eq!(cached.downloaded, 50);
        let record = history.get("A").await.unwrap().unwrap();
        assert_eq!(record.status, HistoryStatus::Pending);
    }

    #[tokio::test]
    async fn completion_marks_done_once_and_drops_broadcast_state() {
        let (relay, history, bus) = relay(ThrottlePolicy::default());
        let popup = bus.endpoint();
        let (_handle, mut rx) = popup.subscribe();
        history.upsert(HistoryEntry::new("A")).await.unwrap();

        relay
            .handle_sample("A", ProgressSample::new(50, 100, 10))
            .await
            .unwrap();
        assert_eq!(relay.tracked(), 1);
        relay
            .handle_sample("A", ProgressSample::new(100, 100, 0))
            .await
            .unwrap();
        relay
            .handle_sample("A", ProgressSample::new(100, 100, 0))
            .await
            .unwrap();

        assert_eq!(relay.tracked(), 0);
        let record = history.get("A").await.unwrap().unwrap();
        assert_eq!(record.status, HistoryStatus::Done);

        let mut seen = Vec::new();
        while let Ok(Some(msg)) =
            tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
        {
            seen.push(msg);
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen[1],
            Message::DownloadProgress {
                id: "A".into(),
                downloaded: 100,
                total: 100,
                speed: 0,
            }
        );
    }

    #[tokio::test]
    async fn completion_is_recorded_when_the_cache_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let broken = KvStore::open(&dir.path().join("cache.db")).await.unwrap();
        if let KvStore::Sqlite(table) = &broken {
            table
                .connection()
                .lock()
                .await
                .execute_batch("DROP TABLE app_state;")
                .await
                .unwrap();
        }
        let bus = MessageBus::new();
        let history = HistoryStore::new(KvStore::in_memory(), HistoryLock::new(), HISTORY_MAX);
        let relay = ProgressRelay::new(
            ProgressCache::new(broken),
            history.clone(),
            bus.endpoint(),
            ThrottlePolicy::default(),
        );
        history.upsert(HistoryEntry::new("A")).await.unwrap();

        let result = relay
            .handle_sample("A", ProgressSample::new(100, 100, 0))
            .await;

        assert!(result.is_err());
        let record = history.get("A").await.unwrap().unwrap();
        assert_eq!(record.status, HistoryStatus::Done);
    }

    #[tokio::test]
    async fn throttled_samples_still_reach_the_cache() {
        let (relay, _history, bus) = relay(ThrottlePolicy {
            min_interval: Some(Duration::from_secs(60)),
            min_delta_bytes: Some(1_000_000),
        });
        let popup = bus.endpoint();
        let (_handle, mut rx) = popup.subscribe();

        for downloaded in [1u64, 2, 3] {
            relay
                .handle_sample("A", ProgressSample::new(downloaded, 1_000_000_000, 0))
                .await
                .unwrap();
        }

        assert_eq!(
            relay.cache().read("A").await.unwrap().unwrap().downloaded,
            3
        );
        // only the first sample went out
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Message::DownloadProgress { downloaded: 1, .. }));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err()
        );
    }
}
