use crate::config::RelayConfig;
use crate::progress::{ProgressRelay, ProgressSample};
use log::{debug, error, info, warn};
use progress_stream::EventStream;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Registry entry for one live stream
struct StreamHandle {
    generation: u64,
    cancel: CancellationToken,
}

/// Why a stream task stopped
enum StreamEnd {
    Completed,
    Failed(String),
    Closed,
}

struct ManagerInner {
    client: Client,
    relay: ProgressRelay,
    config: RelayConfig,
    registry: Mutex<HashMap<String, StreamHandle>>,
    /// Retry timers waiting to reopen a failed stream
    retries: Mutex<HashMap<String, StreamHandle>>,
    next_generation: AtomicU64,
}

/// Owner of the task id -> live stream registry
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(config: RelayConfig, client: Client, relay: ProgressRelay) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                client,
                relay,
                config,
                registry: Mutex::new(HashMap::new()),
                retries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, StreamHandle>> {
        self.inner.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn retries(&self) -> MutexGuard<'_, HashMap<String, StreamHandle>> {
        self.inner.retries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start following `id`; no-op when a stream for it is already live
    pub fn open_stream(&self, id: &str) {
        if id.is_empty() {
            return;
        }

        let (generation, cancel) = {
            let mut registry = self.registry();
            if registry.contains_key(id) {
                debug!("stream {}: already open", id);
                return;
            }
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            registry.insert(
                id.to_string(),
                StreamHandle {
                    generation,
                    cancel: cancel.clone(),
                },
            );
            (generation, cancel)
        };

        info!("stream {}: opening", id);
        let manager = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            manager.run_stream(id, generation, cancel).await;
        });
    }

    /// Cancel and deregister the stream for `id`, including a pending
    /// retry; `false` if neither existed
    pub fn close_stream(&self, id: &str) -> bool {
        let live = self.registry().remove(id);
        let retry = self.retries().remove(id);
        if live.is_none() && retry.is_none() {
            return false;
        }
        for handle in live.iter().chain(retry.iter()) {
            handle.cancel.cancel();
        }
        self.inner.relay.release(id);
        info!("stream {}: closed", id);
        true
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.registry().contains_key(id)
    }

    pub fn open_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Only the task that registered a handle may remove it, so a late
    /// failure can't evict a newer connection for the same id
    fn deregister(&self, id: &str, generation: u64) {
        let mut registry = self.registry();
        if registry.get(id).map(|h| h.generation) == Some(generation) {
            registry.remove(id);
        }
    }

    async fn run_stream(&self, id: String, generation: u64, cancel: CancellationToken) {
        let end = tokio::select! {
            _ = cancel.cancelled() => StreamEnd::Closed,
            end = self.follow(&id) => end,
        };

        match end {
            StreamEnd::Completed => {
                self.deregister(&id, generation);
                info!("stream {}: download complete", id);
                self.schedule_purge(id);
            }
            StreamEnd::Failed(reason) => {
                warn!("stream {}: {}", id, reason);
                self.deregister(&id, generation);
                self.inner.relay.release(&id);
                self.schedule_retry(id, generation);
            }
            StreamEnd::Closed => debug!("stream {}: task stopped", id),
        }
    }

    async fn follow(&self, id: &str) -> StreamEnd {
        let url = self.inner.config.progress_url(id);
        let mut stream = match EventStream::connect(&self.inner.client, &url).await {
            Ok(stream) => stream,
            Err(e) => return StreamEnd::Failed(e.to_string()),
        };

        loop {
            let event = match stream.next_event().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => return StreamEnd::Failed(e.to_string()),
                None => return StreamEnd::Failed("stream ended before completion".to_string()),
            };
            // named events are not progress samples
            if event.event.as_deref().is_some_and(|name| name != "message") {
                continue;
            }
            if self.dispatch(id, &event.data).await {
                return StreamEnd::Completed;
            }
        }
    }

    /// Decode one payload and hand it to the relay; `true` on completion
    pub(crate) async fn dispatch(&self, id: &str, payload: &str) -> bool {
        let Some(sample) = ProgressSample::from_payload(payload) else {
            warn!("stream {}: dropping non-JSON payload {:?}", id, payload);
            return false;
        };
        if let Err(e) = self.inner.relay.handle_sample(id, sample).await {
            error!("stream {}: failed to record progress: {}", id, e);
        }
        sample.is_complete()
    }

    fn schedule_retry(&self, id: String, generation: u64) {
        let cancel = CancellationToken::new();
        let replaced = self.retries().insert(
            id.clone(),
            StreamHandle {
                generation,
                cancel: cancel.clone(),
            },
        );
        if let Some(old) = replaced {
            old.cancel.cancel();
        }

        let manager = self.clone();
        let delay = self.inner.config.retry_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("stream {}: retry cancelled", id);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            {
                let mut retries = manager.retries();
                if retries.get(&id).map(|h| h.generation) == Some(generation) {
                    retries.remove(&id);
                }
            }
            if !manager.is_open(&id) {
                info!("stream {}: retrying after {:?}", id, delay);
                manager.open_stream(&id);
            }
        });
    }

    fn schedule_purge(&self, id: String) {
        let manager = self.clone();
        let relay = self.inner.relay.clone();
        let delay: Duration = self.inner.config.cleanup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // reopened during the grace period; the new stream owns the cache now
            if manager.is_open(&id) {
                debug!("stream {}: reopened, keeping cached progress", id);
                return;
            }
            match relay.purge(&id).await {
                Ok(()) => debug!("stream {}: cached progress removed", id),
                Err(e) => error!("stream {}: failed to remove cached progress: {}", id, e),
            }
        });
    }
}
