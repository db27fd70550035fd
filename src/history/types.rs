//! History record types and status definitions

use serde::{Deserialize, Serialize};

/// Stored as `"pending"` / `"done"`; any other stored value reads as pending
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String")]
pub enum HistoryStatus {
    #[default]
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "done")]
    Done,
}

impl HistoryStatus {
    pub fn is_done(self) -> bool {
        self == HistoryStatus::Done
    }
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryStatus::Pending => write!(f, "pending"),
            HistoryStatus::Done => write!(f, "done"),
        }
    }
}

impl From<String> for HistoryStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "done" => HistoryStatus::Done,
            _ => HistoryStatus::Pending,
        }
    }
}

/// One persisted task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Creation time, epoch milliseconds
    pub ts: i64,
    #[serde(default)]
    pub status: HistoryStatus,
    /// Size in bytes as reported by the download server
    #[serde(default)]
    pub size: Option<u64>,
}

/// Incoming, possibly partial, record for [`HistoryStore::upsert`](super::HistoryStore::upsert)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub url: Option<String>,
    pub ts: Option<i64>,
    pub status: Option<HistoryStatus>,
    pub size: Option<u64>,
}

impl HistoryEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn ts(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }

    pub fn status(mut self, status: HistoryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{HistoryRecord, HistoryStatus};

    #[test]
    fn history_status_display_matches_expected_strings() {
        assert_eq!(HistoryStatus::Pending.to_string(), "pending");
        assert_eq!(HistoryStatus::Done.to_string(), "done");
    }

    #[test]
    fn history_status_from_string_defaults_to_pending() {
        let status: HistoryStatus = "unknown".to_string().into();
        assert_eq!(status, HistoryStatus::Pending);
        let status: HistoryStatus = "done".to_string().into();
        assert_eq!(status, HistoryStatus::Done);
    }

    #[test]
    fn record_reads_stored_json_with_missing_fields() {
        let record: HistoryRecord =
            serde_json::from_str(r#"{"id":"a","ts":5,"url":null}"#).unwrap();
        assert_eq!(record.url, None);
        assert_eq!(record.status, HistoryStatus::Pending);
        assert_eq!(record.size, None);
    }

    #[test]
    fn record_with_unknown_status_reads_as_pending() {
        let list: Vec<HistoryRecord> = serde_json::from_str(
            r#"[{"id":"a","ts":1,"status":"paused"},{"id":"b","ts":2,"status":"done"}]"#,
        )
        .unwrap();
        assert_eq!(list[0].status, HistoryStatus::Pending);
        assert_eq!(list[1].status, HistoryStatus::Done);
        assert_eq!(serde_json::to_string(&list[1].status).unwrap(), "\"done\"");
    }
}
