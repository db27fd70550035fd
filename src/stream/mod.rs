//! Per-task progress streams
//!
//! Owns at most one live connection per task id, with:
//! - fixed-delay, unbounded reconnect after transport errors
//! - close + deregister on the completion sample
//! - delayed purge of the cached progress after completion

mod manager;

pub use manager::ConnectionManager;
