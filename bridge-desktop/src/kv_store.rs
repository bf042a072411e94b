//! Key-Value Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{KeyValueStore, StorageChange},
};
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// SQLite-backed key-value store implementation
///
/// Values are stored as text with an update timestamp. Handles created with
/// [`attach`](SqliteKeyValueStore::attach) share the pool and the change feed,
/// so every window of a desktop shell observes the others' writes.
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
    changes: broadcast::Sender<StorageChange>,
    origin: Uuid,
}

impl SqliteKeyValueStore {
    /// Open (or create) a store at the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path_str))
            .map_err(|e| BridgeError::Storage(format!("Invalid database path: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        let store = Self::from_pool(pool).await?;
        debug!(path = ?db_path, "Initialized key-value store");
        Ok(store)
    }

    /// Open the store at the platform data directory
    pub async fn open_default() -> Result<Self> {
        Self::new(Self::default_path()?).await
    }

    /// `<data dir>/relay-dashboard/store.db`
    pub fn default_path() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("relay-dashboard").join("store.db"))
            .ok_or_else(|| {
                BridgeError::NotAvailable("No platform data directory".to_string())
            })
    }

    /// Create an in-memory store (for testing)
    pub async fn in_memory() -> Result<Self> {
        // Every connection to `:memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| BridgeError::Storage(format!("Failed to create table: {}", e)))?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            pool,
            changes,
            origin: Uuid::new_v4(),
        })
    }

    /// Another handle on the same database with its own origin
    pub fn attach(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            changes: self.changes.clone(),
            origin: Uuid::new_v4(),
        }
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn publish(&self, key: &str, value: Option<String>) {
        if self
            .changes
            .send(StorageChange {
                key: key.to_string(),
                value,
                origin: self.origin,
            })
            .is_err()
        {
            debug!(key, "No change subscribers");
        }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to read '{}': {}", key, e)))?;

        Ok(row.map(|row| row.get(0)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(key, error = %e, "Write rejected");
            BridgeError::Storage(format!("Failed to write '{}': {}", key, e))
        })?;

        debug!(key, bytes = value.len(), "Stored value");
        self.publish(key, Some(value.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to remove '{}': {}", key, e)))?;

        if result.rows_affected() > 0 {
            debug!(key, "Removed value");
            self.publish(key, None);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM kv_entries ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to list keys: {}", e)))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    fn origin(&self) -> Uuid {
        self.origin
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
