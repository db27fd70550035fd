//! User preferences forwarded with every download request

use crate::db::{DbResult, KvStore};

pub const DOWNLOAD_PATH_KEY: &str = "downloadPath";
pub const PROXY_URL_KEY: &str = "proxyUrl";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preferences {
    pub download_path: Option<String>,
    pub proxy_url: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Preferences {
    /// Load preferences; blank values count as unset
    pub async fn load(kv: &KvStore) -> DbResult<Self> {
        Ok(Self {
            download_path: non_blank(kv.get(DOWNLOAD_PATH_KEY).await?),
            proxy_url: non_blank(kv.get(PROXY_URL_KEY).await?),
        })
    }

    pub async fn save(&self, kv: &KvStore) -> DbResult<()> {
        for (key, value) in [
            (DOWNLOAD_PATH_KEY, &self.download_path),
            (PROXY_URL_KEY, &self.proxy_url),
        ] {
            match non_blank(value.clone()) {
                Some(v) => kv.set(key, &v).await?,
                None => kv.remove(key).await?,
            }
        }
        Ok(())
    }
}
