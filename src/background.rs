//! Process-scoped background state
//!
//! Built once at process start and shared by reference; nothing here needs
//! an explicit teardown beyond dropping it.

use crate::api::{self, DownloadRequest};
use crate::bus::{Ack, Endpoint, ListenerHandle, Message, MessageBus};
use crate::config::RelayConfig;
use crate::db::KvStore;
use crate::history::{HistoryEntry, HistoryRecord, HistoryStatus, HistoryStore};
use crate::lock::HistoryLock;
use crate::progress::{ProgressCache, ProgressRelay, ProgressSample};
use crate::settings::Preferences;
use crate::stream::ConnectionManager;
use log::info;
use reqwest::Client;

pub struct Background {
    config: RelayConfig,
    kv: KvStore,
    client: Client,
    history: HistoryStore,
    relay: ProgressRelay,
    streams: ConnectionManager,
    _requests: ListenerHandle,
}

impl Background {
    /// Open persistence as configured and start answering UI requests on `bus`
    pub async fn start(config: RelayConfig, bus: &MessageBus) -> Result<Self, String> {
        let kv = match &config.db_path {
            Some(path) => KvStore::open(path)
                .await
                .map_err(|e| format!("Failed to open database {}: {}", path.display(), e))?,
            None => KvStore::in_memory(),
        };
        Self::with_store(config, kv, bus)
    }

    pub fn with_store(config: RelayConfig, kv: KvStore, bus: &MessageBus) -> Result<Self, String> {
        let client = Client::builder()
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        let endpoint: Endpoint = bus.endpoint();
        let history = HistoryStore::new(kv.clone(), HistoryLock::new(), config.history_max)
            .with_notifier(endpoint.clone());
        let relay = ProgressRelay::new(
            ProgressCache::new(kv.clone()),
            history.clone(),
            endpoint.clone(),
            config.throttle,
        );
        let streams = ConnectionManager::new(config.clone(), client.clone(), relay.clone());

        let requests = {
            let streams = streams.clone();
            endpoint.listen(move |message| match message {
                Message::StartProgressSse { id } if !id.is_empty() => {
                    streams.open_stream(id);
                    Some(Ack { ok: true })
                }
                _ => None,
            })
        };

        info!("background ready, server {}", config.server_base);
        Ok(Self {
            config,
            kv,
            client,
            history,
            relay,
            streams,
            _requests: requests,
        })
    }

    /// Ask the server to download `url`, record the task and follow it.
    ///
    /// When the server does not hand out a task id nothing is recorded and
    /// no stream is opened.
    pub async fn launch(&self, url: &str) -> Result<HistoryRecord, String> {
        let prefs = Preferences::load(&self.kv)
            .await
            .map_err(|e| format!("Failed to load preferences: {}", e))?;
        let request = DownloadRequest::new(url, &prefs);
        let task = api::launch_download(&self.client, &self.config.download_url(), &request).await?;

        let mut entry = HistoryEntry::new(&task.id)
            .url(url)
            .ts(chrono::Utc::now().timestamp_millis())
            .status(HistoryStatus::Pending);
        entry.size = task.size;
        let record = self
            .history
            .upsert(entry)
            .await
            .map_err(|e| format!("Failed to record task {}: {}", task.id, e))?;

        self.streams.open_stream(&task.id);
        Ok(record)
    }

    pub fn open_stream(&self, id: &str) {
        self.streams.open_stream(id);
    }

    pub fn close_stream(&self, id: &str) -> bool {
        self.streams.close_stream(id)
    }

    pub fn streams(&self) -> &ConnectionManager {
        &self.streams
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Last cached sample of a running (or just finished) task
    pub async fn progress(&self, id: &str) -> Result<Option<ProgressSample>, String> {
        self.relay
            .cache()
            .read(id)
            .await
            .map_err(|e| format!("Failed to read progress of {}: {}", id, e))
    }

    /// Tasks still waiting for completion, newest first
    pub async fn pending_ids(&self) -> Result<Vec<String>, String> {
        let list = self
            .history
            .list()
            .await
            .map_err(|e| format!("Failed to read history: {}", e))?;
        Ok(list
            .into_iter()
            .filter(|r| !r.status.is_done())
            .map(|r| r.id)
            .collect())
    }

    pub fn store(&self) -> &KvStore {
        &self.kv
    }
}

#[cfg(test)]
mod tests {
    use super::Background;
    use crate::bus::{Ack, Message, MessageBus};
    use crate::config::RelayConfig;
    use crate::db::KvStore;
    use crate::history::HistoryStatus;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> RelayConfig {
        RelayConfig {
            server_base: format!("{}/gd", server.uri()),
            retry_delay: Duration::from_millis(50),
            cleanup_delay: Duration::from_millis(100),
            ..RelayConfig::default()
        }
    }

    fn sse(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream")
    }

    #[tokio::test]
    async fn launch_records_task_follows_it_and_notifies_ui() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gd/download"))
            .and(body_json(serde_json::json!({
                "url": "http://files/a.bin",
                "downloadPath": "/data"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "A", "status": "success", "size": 100
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gd/progress/A"))
            .respond_with(sse(
                "data: {\"downloaded\":50,\"total\":100,\"speed\":5}\n\n\
                 data: {\"downloaded\":100,\"total\":100,\"speed\":0}\n\n",
            ))
            .mount(&server)
            .await;

        let bus = MessageBus::new();
        let popup = bus.endpoint();
        let (_handle, mut rx) = popup.subscribe();
        let kv = KvStore::in_memory();
        kv.set("downloadPath", "/data").await.unwrap();
        let background = Background::with_store(config(&server), kv, &bus).unwrap();

        let record = background.launch("http://files/a.bin").await.unwrap();
        assert_eq!(record.id, "A");
        assert_eq!(record.size, Some(100));
        assert_eq!(record.status, HistoryStatus::Pending);

        let mut kinds = Vec::new();
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            kinds.push(msg.kind());
            if let Message::DownloadProgress {
                downloaded, total, ..
            } = msg
            {
                if downloaded >= total {
                    break;
                }
            }
        }
        assert_eq!(
            kinds,
            vec!["ADD_HISTORY", "DOWNLOAD_PROGRESS", "DOWNLOAD_PROGRESS"]
        );

        for _ in 0..50 {
            if background.pending_ids().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(background.pending_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_launch_records_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gd/download"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": -1, "message": "invalid url", "data": {}
            })))
            .mount(&server)
            .await;

        let bus = MessageBus::new();
        let background =
            Background::with_store(config(&server), KvStore::in_memory(), &bus).unwrap();

        let err = background.launch("nope").await.unwrap_err();
        assert!(err.contains("invalid url"));
        assert!(background.history().list().await.unwrap().is_empty());
        assert!(background.streams().open_ids().is_empty());
    }

    #[tokio::test]
    async fn start_progress_request_is_acknowledged_and_subscribes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gd/progress/Z"))
            .respond_with(sse("").set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let bus = MessageBus::new();
        let background =
            Background::with_store(config(&server), KvStore::in_memory(), &bus).unwrap();
        let popup = bus.endpoint();

        let (tx, rx) = oneshot::channel();
        popup.send_with_ack(Message::StartProgressSse { id: "Z".into() }, move |ack| {
            let _ = tx.send(ack);
        });

        assert_eq!(rx.await.unwrap(), Ack { ok: true });
        assert!(background.streams().is_open("Z"));
        assert!(background.close_stream("Z"));
    }
}
