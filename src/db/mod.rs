//! Key-value persistence behind the history store and the live-progress cache
//!
//! Two interchangeable backends:
//! - `Sqlite`: the `app_state` table in a local turso database
//! - `Memory`: a process-local map for tests and throwaway runs

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use turso::Builder;

// Custom error type for database operations
pub type DbResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub mod app_state;
pub mod memory;

pub use app_state::AppStateTable;
pub use memory::MemoryKv;

#[derive(Clone)]
pub enum KvStore {
    Sqlite(AppStateTable),
    Memory(MemoryKv),
}

impl KvStore {
    /// Open (or create) the database file and make sure the table exists
    pub async fn open(db_path: &Path) -> DbResult<Self> {
        let path = db_path
            .to_str()
            .ok_or_else(|| format!("Database path is not valid UTF-8: {}", db_path.display()))?;
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;

        conn.execute_batch(app_state::get_table_sql()).await?;

        // Wrap Connection in Mutex to serialize database access
        Ok(KvStore::Sqlite(AppStateTable::new(Arc::new(Mutex::new(conn)))))
    }

    pub fn in_memory() -> Self {
        KvStore::Memory(MemoryKv::default())
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        match self {
            KvStore::Sqlite(table) => table.get_app_state(key).await,
            KvStore::Memory(map) => Ok(map.get(key)),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        match self {
            KvStore::Sqlite(table) => table.set_app_state(key, value).await,
            KvStore::Memory(map) => {
                map.set(key, value);
                Ok(())
            }
        }
    }

    pub async fn remove(&self, key: &str) -> DbResult<()> {
        match self {
            KvStore::Sqlite(table) => table.delete_app_state(key).await,
            KvStore::Memory(map) => {
                map.remove(key);
                Ok(())
            }
        }
    }

    /// Read a JSON-encoded value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Store a value as JSON
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw).await
    }
}
