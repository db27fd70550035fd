//! Download task relay
//!
//! Launches downloads on the local download server, follows each task's
//! progress stream, caches the latest sample and keeps a bounded task history.
//! UI contexts talk to the background over the [`bus`].

pub mod api;
pub mod background;
pub mod bus;
pub mod config;
pub mod db;
pub mod history;
pub mod lock;
pub mod progress;
pub mod settings;
pub mod stream;

pub use background::Background;
pub use config::RelayConfig;
