use super::DbResult;
use std::sync::Arc;
use tokio::sync::Mutex;
use turso::Connection;

/// Get SQL for creating app_state table
pub fn get_table_sql() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS app_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "
}

/// The `app_state` key-value table on a shared connection
#[derive(Clone)]
pub struct AppStateTable {
    conn: Arc<Mutex<Connection>>,
}

impl AppStateTable {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    // ============ App State Functions ============

    /// Get app state value
    pub async fn get_app_state(&self, key: &str) -> DbResult<Option<String>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT value FROM app_state WHERE key = ?1", turso::params![key])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    /// Set app state value
    pub async fn set_app_state(&self, key: &str, value: &str) -> DbResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO app_state (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = ?2",
            turso::params![key, value],
        )
        .await?;
        Ok(())
    }

    /// Delete app state value
    pub async fn delete_app_state(&self, key: &str) -> DbResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM app_state WHERE key = ?1", turso::params![key])
            .await?;
        Ok(())
    }
}
