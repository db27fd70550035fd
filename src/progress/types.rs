//! Progress sample and broadcast throttle definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

/// One measurement reported by the progress stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub downloaded: u64,
    pub total: u64,
    pub speed: u64, // bytes per second
}

impl ProgressSample {
    pub fn new(downloaded: u64, total: u64, speed: u64) -> Self {
        Self {
            downloaded,
            total,
            speed,
        }
    }

    /// Decode a `{downloaded, total, speed}` payload.
    ///
    /// Missing, negative or non-numeric fields become 0. Returns `None` only
    /// when the payload is not JSON at all.
    pub fn from_payload(payload: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(payload).ok()?;
        Some(Self {
            downloaded: numeric_field(&value, "downloaded"),
            total: numeric_field(&value, "total"),
            speed: numeric_field(&value, "speed"),
        })
    }

    /// The server reports completion as `downloaded >= total`
    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.total
    }
}

fn numeric_field(value: &Value, name: &str) -> u64 {
    let Some(field) = value.get(name) else {
        return 0;
    };
    if let Some(n) = field.as_u64() {
        return n;
    }
    match field.as_f64() {
        Some(f) if f.is_finite() && f > 0.0 => f as u64,
        _ => 0,
    }
}

/// When a broadcast was last sent for a task
#[derive(Debug, Clone, Copy)]
pub(crate) struct BroadcastMark {
    pub at: Instant,
    pub downloaded: u64,
}

/// Broadcast throttle.
///
/// With no threshold set every sample is broadcast. Otherwise a sample is
/// held back only when it fails every configured threshold: it arrived
/// sooner than `min_interval` after the last broadcast *and* moved fewer than
/// `min_delta_bytes`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub min_interval: Option<Duration>,
    pub min_delta_bytes: Option<u64>,
}

impl ThrottlePolicy {
    pub fn is_disabled(&self) -> bool {
        self.min_interval.is_none() && self.min_delta_bytes.is_none()
    }

    pub(crate) fn should_broadcast(
        &self,
        last: Option<&BroadcastMark>,
        now: Instant,
        sample: &ProgressSample,
    ) -> bool {
        if self.is_disabled() || sample.is_complete() {
            return true;
        }
        let Some(last) = last else {
            return true;
        };
        let too_soon = self
            .min_interval
            .map_or(true, |interval| now.duration_since(last.at) < interval);
        let too_small = self
            .min_delta_bytes
            .map_or(true, |delta| sample.downloaded.abs_diff(last.downloaded) < delta);
        !(too_soon && too_small)
    }
}
