use crate::history::HISTORY_MAX;
use crate::progress::ThrottlePolicy;
use log::warn;
use std::path::PathBuf;
use std::time::Duration;

/// Base URL of the local download server
pub const DEFAULT_SERVER_BASE: &str = "http://127.0.0.1:11235/gd";

/// Delay before reopening a failed progress stream
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Grace period before a finished task's cached progress is removed, so late
/// readers still see the final sample
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub server_base: String,
    pub retry_delay: Duration,
    pub cleanup_delay: Duration,
    pub history_max: usize,
    pub throttle: ThrottlePolicy,
    /// `None` keeps everything in memory
    pub db_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_base: DEFAULT_SERVER_BASE.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            history_max: HISTORY_MAX,
            throttle: ThrottlePolicy::default(),
            db_path: None,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `GD_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str| parse_number(key, lookup(key)).map(Duration::from_millis);
        let mut config = Self::default();

        if let Some(base) = lookup("GD_SERVER_BASE").filter(|v| !v.trim().is_empty()) {
            config.server_base = base.trim().trim_end_matches('/').to_string();
        }
        if let Some(delay) = millis("GD_RETRY_DELAY_MS") {
            config.retry_delay = delay;
        }
        if let Some(delay) = millis("GD_CLEANUP_DELAY_MS") {
            config.cleanup_delay = delay;
        }
        match parse_number("GD_HISTORY_MAX", lookup("GD_HISTORY_MAX")) {
            Some(0) => warn!("ignoring GD_HISTORY_MAX=0: history must keep at least one record"),
            Some(max) => config.history_max = max as usize,
            None => {}
        }
        config.throttle = ThrottlePolicy {
            min_interval: millis("GD_THROTTLE_MS"),
            min_delta_bytes: parse_number("GD_THROTTLE_BYTES", lookup("GD_THROTTLE_BYTES")),
        };
        if let Some(path) = lookup("GD_DB_PATH").filter(|v| !v.trim().is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }
        config
    }

    pub fn download_url(&self) -> String {
        format!("{}/download", self.server_base)
    }

    pub fn progress_url(&self, id: &str) -> String {
        format!("{}/progress/{}", self.server_base, urlencoding::encode(id))
    }
}

fn parse_number(key: &str, raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("ignoring {}={:?}: not a non-negative integer", key, raw);
            None
        }
    }
}
