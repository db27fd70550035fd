//! Client for the download server's task-creation endpoint

use crate::settings::Preferences;
use log::{error, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Body of `POST {base}/download`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, prefs: &Preferences) -> Self {
        Self {
            url: url.into(),
            download_path: prefs.download_path.clone(),
            proxy_url: prefs.proxy_url.clone(),
        }
    }
}

/// Union of the two reply shapes the server has used:
/// `{id, status, size}` and `{code, message, data: {id, size}}`
#[derive(Debug, Default, Deserialize)]
pub struct DownloadReply {
    pub id: Option<String>,
    pub status: Option<String>,
    pub size: Option<i64>,
    pub code: Option<i64>,
    pub message: Option<String>,
    pub data: Option<ReplyData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplyData {
    pub id: Option<String>,
    pub size: Option<i64>,
}

/// A task the server accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedTask {
    pub id: String,
    /// `None` when the server could not determine the size
    pub size: Option<u64>,
}

fn known_size(size: Option<i64>) -> Option<u64> {
    size.and_then(|s| u64::try_from(s).ok())
}

impl DownloadReply {
    /// Extract the task id from whichever reply shape the server sent
    pub fn into_task(self) -> Result<LaunchedTask, String> {
        if self.status.as_deref() == Some("success") {
            return match self.id.filter(|id| !id.is_empty()) {
                Some(id) => Ok(LaunchedTask {
                    id,
                    size: known_size(self.size),
                }),
                None => Err("Download accepted without a task id".to_string()),
            };
        }

        if self.code == Some(0) {
            let data = self.data.unwrap_or_default();
            return match data.id.filter(|id| !id.is_empty()) {
                Some(id) => Ok(LaunchedTask {
                    id,
                    size: known_size(data.size),
                }),
                None => Err("Download accepted without a task id".to_string()),
            };
        }

        Err(format!(
            "Download rejected: {}",
            self.message
                .or(self.status)
                .unwrap_or_else(|| "unrecognized reply".to_string())
        ))
    }
}

/// Ask the server to start downloading `request.url`
pub async fn launch_download(
    client: &Client,
    endpoint: &str,
    request: &DownloadRequest,
) -> Result<LaunchedTask, String> {
    let response = client
        .post(endpoint)
        .json(request)
        .send()
        .await
        .map_err(|e| format!("Cannot reach local service: {}", e))?;

    // error replies carry a JSON envelope too, so the status alone decides nothing
    let reply: DownloadReply = response
        .json()
        .await
        .map_err(|e| format!("Failed to decode download reply: {}", e))?;

    match reply.into_task() {
        Ok(task) => {
            info!("download accepted: {} -> {}", request.url, task.id);
            Ok(task)
        }
        Err(e) => {
            error!("download API error for {}: {}", request.url, e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{launch_download, DownloadReply, DownloadRequest, LaunchedTask};
    use crate::settings::Preferences;
    use reqwest::Client;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(json: serde_json::Value) -> DownloadReply {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn accepts_both_reply_shapes() {
        let flat = reply(serde_json::json!({"id": "t1", "status": "success", "size": 2048}));
        assert_eq!(
            flat.into_task(),
            Ok(LaunchedTask {
                id: "t1".into(),
                size: Some(2048),
            })
        );

        let envelope = reply(serde_json::json!({
            "code": 0, "message": "ok", "data": {"id": "t2", "size": -1}
        }));
        assert_eq!(
            envelope.into_task(),
            Ok(LaunchedTask {
                id: "t2".into(),
                size: None,
            })
        );
    }

    #[test]
    fn rejects_errors_and_missing_ids() {
        let err = reply(serde_json::json!({"code": -1, "message": "bad url", "data": {}}));
        assert_eq!(err.into_task(), Err("Download rejected: bad url".to_string()));

        let no_id = reply(serde_json::json!({"status": "success"}));
        assert!(no_id.into_task().is_err());

        let no_data = reply(serde_json::json!({"code": 0, "message": "ok"}));
        assert!(no_data.into_task().is_err());
    }

    #[test]
    fn request_omits_unset_preferences() {
        let body = serde_json::to_value(DownloadRequest::new(
            "http://files/a.bin",
            &Preferences {
                download_path: Some("/d".into()),
                proxy_url: None,
            },
        ))
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"url": "http://files/a.bin", "downloadPath": "/d"})
        );
    }

    #[tokio::test]
    async fn launch_posts_the_request_and_reads_the_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gd/download"))
            .and(body_json(serde_json::json!({
                "url": "http://files/a.bin",
                "proxyUrl": "http://proxy:8080"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0, "message": "ok", "data": {"id": "abc", "size": 10}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = DownloadRequest {
            url: "http://files/a.bin".into(),
            download_path: None,
            proxy_url: Some("http://proxy:8080".into()),
        };
        let task = launch_download(
            &Client::new(),
            &format!("{}/gd/download", server.uri()),
            &request,
        )
        .await
        .unwrap();
        assert_eq!(task.id, "abc");
        assert_eq!(task.size, Some(10));
    }

    #[tokio::test]
    async fn unreachable_server_yields_no_task() {
        let request = DownloadRequest::new("http://files/a.bin", &Preferences::default());
        // nothing listens on port 9 of the loopback interface
        let result = launch_download(&Client::new(), "http://127.0.0.1:9/gd/download", &request).await;
        assert!(result.is_err());
    }
}
