use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub use types::StateValue;

/// Name of the liveness flag published on every tick.
pub const CONNECTION_STATE: &str = "info.connection";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("value encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateEntry {
    pub name: String,
    pub value: StateValue,
    /// Set for values confirmed by the device rather than requested by a user.
    pub ack: bool,
    pub updated_at_ms: i64,
}

/// Key/value sink for named states. The poller only ever writes to it.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn publish(&self, name: &str, value: StateValue, ack: bool) -> Result<(), StoreError>;

    /// Every state, ordered by name.
    async fn snapshot(&self) -> Result<Vec<StateEntry>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    states: RwLock<BTreeMap<String, StateEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<StateEntry> {
        self.states.read().await.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn publish(&self, name: &str, value: StateValue, ack: bool) -> Result<(), StoreError> {
        let entry = StateEntry {
            name: name.to_string(),
            value,
            ack,
            updated_at_ms: unix_ms(),
        };
        self.states.write().await.insert(name.to_string(), entry);
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<StateEntry>, StoreError> {
        Ok(self.states.read().await.values().cloned().collect())
    }
}

/// States persisted in a SQLite file, one row per name.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let url = sqlite_url(path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL;")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL;")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS states (\
                name TEXT PRIMARY KEY,\
                value TEXT NOT NULL,\
                ack INTEGER NOT NULL,\
                updated_at INTEGER NOT NULL\
            )",
        )
        .execute(&pool)
        .await?;

        info!(path = %path, "state store initialized");

        Ok(Self { pool })
    }

    pub async fn get(&self, name: &str) -> Result<Option<StateEntry>, StoreError> {
        let row = sqlx::query("SELECT name, value, ack, updated_at FROM states WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(entry_from_row).transpose()
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn publish(&self, name: &str, value: StateValue, ack: bool) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&value)?;
        sqlx::query(
            "INSERT INTO states (name, value, ack, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET \
             value = excluded.value, ack = excluded.ack, updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(encoded.as_str())
        .bind(ack)
        .bind(unix_ms())
        .execute(&self.pool)
        .await?;

        debug!(name, value = %encoded, ack, "state stored");
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<StateEntry>, StoreError> {
        let rows = sqlx::query("SELECT name, value, ack, updated_at FROM states ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StateEntry, StoreError> {
    let value: String = row.get("value");
    Ok(StateEntry {
        name: row.get::<String, _>("name"),
        value: serde_json::from_str(&value)?,
        ack: row.get::<bool, _>("ack"),
        updated_at_ms: row.get::<i64, _>("updated_at"),
    })
}

fn sqlite_url(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite://{path}?mode=rwc")
    }
}

fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_overwrites_by_name() {
        let store = MemoryStore::new();
        store
            .publish(CONNECTION_STATE, StateValue::from(false), true)
            .await
            .expect("publish");
        store
            .publish(CONNECTION_STATE, StateValue::from(true), true)
            .await
            .expect("publish");

        let entry = store.get(CONNECTION_STATE).await.expect("entry");
        assert_eq!(entry.value, StateValue::Bool(true));
        assert!(entry.ack);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn memory_snapshot_is_sorted() {
        let store = MemoryStore::new();
        for name in ["outputs.A02", "inputs.S01", "outputs.A01"] {
            store
                .publish(name, StateValue::from("OFF"), true)
                .await
                .expect("publish");
        }

        let names: Vec<String> = store
            .snapshot()
            .await
            .expect("snapshot")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["inputs.S01", "outputs.A01", "outputs.A02"]);
    }

    #[test]
    fn sqlite_url_creates_missing_files() {
        assert_eq!(sqlite_url("states.db"), "sqlite://states.db?mode=rwc");
        assert_eq!(sqlite_url("sqlite::memory:"), "sqlite::memory:");
    }
}
