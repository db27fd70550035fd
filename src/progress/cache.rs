use crate::db::{DbResult, KvStore};

use super::types::ProgressSample;

pub const DOWNLOADED_PREFIX: &str = "gd_downloaded_";
pub const TOTAL_PREFIX: &str = "gd_total_";
pub const SPEED_PREFIX: &str = "gd_speed_";

/// Latest sample per task, one key per field
#[derive(Clone)]
pub struct ProgressCache {
    kv: KvStore,
}

impl ProgressCache {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Overwrite the cached sample; no merge and no throttling here
    pub async fn write(&self, id: &str, sample: &ProgressSample) -> DbResult<()> {
        self.kv
            .set(&format!("{DOWNLOADED_PREFIX}{id}"), &sample.downloaded.to_string())
            .await?;
        self.kv
            .set(&format!("{TOTAL_PREFIX}{id}"), &sample.total.to_string())
            .await?;
        self.kv
            .set(&format!("{SPEED_PREFIX}{id}"), &sample.speed.to_string())
            .await?;
        Ok(())
    }

    /// `None` when nothing is cached for the task
    pub async fn read(&self, id: &str) -> DbResult<Option<ProgressSample>> {
        let Some(downloaded) = self.kv.get(&format!("{DOWNLOADED_PREFIX}{id}")).await? else {
            return Ok(None);
        };
        let total = self.kv.get(&format!("{TOTAL_PREFIX}{id}")).await?;
        let speed = self.kv.get(&format!("{SPEED_PREFIX}{id}")).await?;
        let parse = |v: Option<String>| v.and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        Ok(Some(ProgressSample {
            downloaded: parse(Some(downloaded)),
            total: parse(total),
            speed: parse(speed),
        }))
    }

    pub async fn purge(&self, id: &str) -> DbResult<()> {
        self.kv.remove(&format!("{DOWNLOADED_PREFIX}{id}")).await?;
        self.kv.remove(&format!("{SPEED_PREFIX}{id}")).await?;
        self.kv.remove(&format!("{TOTAL_PREFIX}{id}")).await?;
        Ok(())
    }
}
