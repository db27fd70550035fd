//! Best-effort message bus between execution contexts
//!
//! The background context and any number of UI contexts each hold an
//! [`Endpoint`]. A message sent from one endpoint reaches the listeners of
//! every *other* endpoint. Delivery is fire-and-forget:
//! - no listener is not an error, the message is simply dropped
//! - nothing is retried
//! - order across listeners is unspecified

use crate::history::HistoryStatus;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Cross-context messages, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    DownloadProgress {
        id: String,
        downloaded: u64,
        total: u64,
        speed: u64,
    },
    AddHistory {
        id: String,
        url: Option<String>,
        ts: i64,
        status: HistoryStatus,
        size: Option<u64>,
    },
    /// UI -> background: (re)subscribe to a task's progress stream
    StartProgressSse { id: String },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::DownloadProgress { .. } => "DOWNLOAD_PROGRESS",
            Message::AddHistory { .. } => "ADD_HISTORY",
            Message::StartProgressSse { .. } => "START_PROGRESS_SSE",
        }
    }
}

/// Acknowledgement a listener may hand back to the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

type Handler = Box<dyn Fn(&Message) -> Option<Ack> + Send + Sync>;

struct Delivery {
    message: Message,
    reply: Option<mpsc::UnboundedSender<Ack>>,
}

struct Listener {
    context: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct BusInner {
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener: AtomicU64,
    next_context: AtomicU64,
}

impl BusInner {
    fn listeners(&self) -> MutexGuard<'_, HashMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The shared bus; hand out one [`Endpoint`] per execution context
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the endpoint for a new execution context
    pub fn endpoint(&self) -> Endpoint {
        let context = self.inner.next_context.fetch_add(1, Ordering::Relaxed);
        Endpoint {
            context,
            inner: self.inner.clone(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }
}

/// One execution context's view of the bus
#[derive(Clone)]
pub struct Endpoint {
    context: u64,
    inner: Arc<BusInner>,
}

impl Endpoint {
    /// Fire-and-forget delivery to other contexts
    pub fn send(&self, message: Message) {
        self.deliver(message, None);
    }

    /// Like [`send`](Self::send), passing the first acknowledgement (if any
    /// listener answers) to `callback`
    pub fn send_with_ack<F>(&self, message: Message, callback: F)
    where
        F: FnOnce(Ack) + Send + 'static,
    {
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        if self.deliver(message, Some(reply_tx)) == 0 {
            return;
        }
        tokio::spawn(async move {
            // None once every listener handled the message without answering
            if let Some(ack) = reply_rx.recv().await {
                callback(ack);
            }
        });
    }

    fn deliver(&self, message: Message, reply: Option<mpsc::UnboundedSender<Ack>>) -> usize {
        let listeners = self.inner.listeners();
        let mut delivered = 0;
        for listener in listeners.values() {
            if listener.context == self.context {
                continue;
            }
            let delivery = Delivery {
                message: message.clone(),
                reply: reply.clone(),
            };
            // a listener whose task already ended is the same as no listener
            if listener.tx.send(delivery).is_ok() {
                delivered += 1;
            }
        }
        if delivered == 0 {
            debug!("bus: no receiver for {}", message.kind());
        }
        delivered
    }

    /// Register a handler for messages sent by other contexts.
    ///
    /// The handler runs on its own task; returning `Some(ack)` answers the
    /// sender. Dropping the returned handle unregisters the listener.
    pub fn listen<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&Message) -> Option<Ack> + Send + Sync + 'static,
    {
        let handler: Handler = Box::new(handler);
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners().insert(
            id,
            Listener {
                context: self.context,
                tx,
            },
        );

        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let ack = handler(&delivery.message);
                if let (Some(ack), Some(reply)) = (ack, delivery.reply) {
                    let _ = reply.send(ack);
                }
            }
        });

        ListenerHandle {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Convenience listener that forwards every message into a channel
    pub fn subscribe(&self) -> (ListenerHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.listen(move |message| {
            let _ = tx.send(message.clone());
            None
        });
        (handle, rx)
    }
}

/// Registration of one listener; unregisters on drop
pub struct ListenerHandle {
    id: u64,
    inner: Arc<BusInner>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.inner.listeners().remove(&self.id);
    }
}
