/// SQLite-backed persister.
///
/// Each partition is one row in the `partitions` table holding the JSON text
/// of its state. Saving replaces the row; recovering a missing row yields `{}`.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::PersistError;
use crate::store::{empty_state, validate_partition, Persister};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS partitions (
     name        TEXT PRIMARY KEY,
     state       TEXT NOT NULL,
     updated_at  INTEGER NOT NULL
 );";

enum Location {
    File(PathBuf),
    InMemory,
}

pub struct SqlitePersister {
    location: Location,
    conn: Mutex<Option<Connection>>,
}

impl SqlitePersister {
    /// Persister for a database file; the file is created by `start`.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            location: Location::File(path.as_ref().to_path_buf()),
            conn: Mutex::new(None),
        }
    }

    /// Persister for a private in-memory database (for tests).
    pub fn in_memory() -> Self {
        Self {
            location: Location::InMemory,
            conn: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Persister for SqlitePersister {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn start(&self) -> Result<(), PersistError> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Err(PersistError::AlreadyInitialized);
        }

        let conn = match &self.location {
            Location::File(path) => {
                let conn = Connection::open(path).map_err(|e| {
                    PersistError::WriteDenied(format!("cannot open {}: {e}", path.display()))
                })?;
                conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                info!(path = %path.display(), "SQLite persister started");
                conn
            }
            Location::InMemory => Connection::open_in_memory()?,
        };
        conn.execute_batch(SCHEMA)?;

        *guard = Some(conn);
        Ok(())
    }

    async fn save(&self, state: &Value, partition: &str) -> Result<(), PersistError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(PersistError::NotInitialized)?;
        validate_partition(partition)?;

        let json =
            serde_json::to_string(state).map_err(|e| PersistError::InvalidState(e.to_string()))?;
        conn.execute(
            "INSERT INTO partitions (name, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![partition, json, chrono::Utc::now().timestamp()],
        )?;
        debug!(partition, "Saved partition to SQLite");
        Ok(())
    }

    async fn recover(&self, partition: &str) -> Result<Value, PersistError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(PersistError::NotInitialized)?;
        validate_partition(partition)?;

        let row: Option<String> = conn
            .query_row(
                "SELECT state FROM partitions WHERE name = ?1",
                params![partition],
                |row| row.get(0),
            )
            .optional()?;

        match row {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                PersistError::Backend(format!("corrupt state for partition {partition}: {e}"))
            }),
            None => Ok(empty_state()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let persister = SqlitePersister::in_memory();
        assert_eq!(
            persister.recover("numbers").await,
            Err(PersistError::NotInitialized)
        );
        persister.start().await.unwrap();
        assert_eq!(persister.start().await, Err(PersistError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn test_not_started_reported_before_partition_name() {
        let persister = SqlitePersister::in_memory();
        assert_eq!(
            persister.save(&json!({}), "say hi").await,
            Err(PersistError::NotInitialized)
        );
        assert_eq!(
            persister.recover("say hi").await,
            Err(PersistError::NotInitialized)
        );

        persister.start().await.unwrap();
        assert!(matches!(
            persister.save(&json!({}), "say hi").await,
            Err(PersistError::InvalidPartition(_))
        ));
    }

    #[tokio::test]
    async fn test_save_replaces_previous_state() {
        let persister = SqlitePersister::in_memory();
        persister.start().await.unwrap();

        assert_eq!(persister.recover("counter").await.unwrap(), json!({}));
        persister.save(&json!({"count": 1}), "counter").await.unwrap();
        persister.save(&json!({"count": 2}), "counter").await.unwrap();
        assert_eq!(persister.recover("counter").await.unwrap(), json!({"count": 2}));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opbot.db");

        let first = SqlitePersister::open(&path);
        first.start().await.unwrap();
        first
            .save(&json!({"entries": ["a", "b"]}), "notes")
            .await
            .unwrap();
        drop(first);

        let second = SqlitePersister::open(&path);
        second.start().await.unwrap();
        assert_eq!(
            second.recover("notes").await.unwrap(),
            json!({"entries": ["a", "b"]})
        );
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let persister = SqlitePersister::in_memory();
        persister.start().await.unwrap();
        persister.save(&json!({"a": 1}), "one").await.unwrap();
        assert_eq!(persister.recover("two").await.unwrap(), json!({}));
    }
}
