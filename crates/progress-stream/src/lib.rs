//! Server-sent event client used to follow per-task progress endpoints.
//!
//! The client is deliberately thin: it opens the stream, validates that the
//! server really answered with `text/event-stream`, and yields decoded events.
//! Reconnection policy belongs to the caller.

mod decoder;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::debug;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::collections::VecDeque;
use thiserror::Error;

pub use decoder::{SseDecoder, SseEvent};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to connect: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("unexpected content type {0:?}")]
    ContentType(String),
    #[error("failed to read stream: {0}")]
    Read(#[source] reqwest::Error),
}

/// An open event stream
pub struct EventStream {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
}

impl EventStream {
    /// Open `url` as an event stream
    pub async fn connect(client: &Client, url: &str) -> Result<Self, StreamError> {
        let response = client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(StreamError::Connect)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(StreamError::Status(status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("text/event-stream") {
            return Err(StreamError::ContentType(content_type));
        }

        debug!("event stream opened: {}", url);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Ok(Self {
            body,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        })
    }

    /// Next decoded event; `None` once the server closes the stream
    pub async fn next_event(&mut self) -> Option<Result<SseEvent, StreamError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            match self.body.next().await? {
                Ok(chunk) => self.pending.extend(self.decoder.feed(&chunk)),
                Err(e) => return Some(Err(StreamError::Read(e))),
            }
        }
    }
}
