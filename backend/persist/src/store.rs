use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::PersistError;

/// Abstract storage for per-partition command state.
///
/// Single-writer and best-effort: there is no transaction spanning a
/// `recover` and the following `save`.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Open connections and run permission checks. Fails with
    /// `AlreadyInitialized` when called a second time.
    async fn start(&self) -> Result<(), PersistError>;

    /// Replace the stored state of `partition`.
    async fn save(&self, state: &Value, partition: &str) -> Result<(), PersistError>;

    /// Load the stored state of `partition`, or `{}` when none exists.
    async fn recover(&self, partition: &str) -> Result<Value, PersistError>;
}

/// State handed out for a partition that has never been saved.
pub fn empty_state() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Partition names double as file names and table keys, so they are limited
/// to `[A-Za-z0-9_-]+`.
pub fn validate_partition(partition: &str) -> Result<(), PersistError> {
    let valid = !partition.is_empty()
        && partition
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PersistError::InvalidPartition(partition.to_string()))
    }
}

/// Serialize a typed value and save it.
pub async fn save_typed<T>(
    persister: &dyn Persister,
    value: &T,
    partition: &str,
) -> Result<(), PersistError>
where
    T: Serialize + ?Sized,
{
    let state =
        serde_json::to_value(value).map_err(|e| PersistError::InvalidState(e.to_string()))?;
    persister.save(&state, partition).await
}

/// Recover a partition and deserialize it into `T`.
pub async fn recover_typed<T>(persister: &dyn Persister, partition: &str) -> Result<T, PersistError>
where
    T: DeserializeOwned,
{
    let state = persister.recover(partition).await?;
    serde_json::from_value(state).map_err(|e| PersistError::InvalidState(e.to_string()))
}

/// In-process persister. Used by tests and by the `memory` persister kind.
#[derive(Default)]
pub struct MemoryPersister {
    started: AtomicBool,
    partitions: RwLock<HashMap<String, Value>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for an already-started persister.
    pub fn started() -> Self {
        let persister = Self::new();
        persister.started.store(true, Ordering::SeqCst);
        persister
    }

    fn ensure_started(&self) -> Result<(), PersistError> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PersistError::NotInitialized)
        }
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    fn name(&self) -> &str {
        "memory"
    }

    async fn start(&self) -> Result<(), PersistError> {
        self.started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| PersistError::AlreadyInitialized)
    }

    async fn save(&self, state: &Value, partition: &str) -> Result<(), PersistError> {
        self.ensure_started()?;
        validate_partition(partition)?;
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| PersistError::Backend("partition map poisoned".into()))?;
        partitions.insert(partition.to_string(), state.clone());
        debug!(partition, "Saved partition to memory");
        Ok(())
    }

    async fn recover(&self, partition: &str) -> Result<Value, PersistError> {
        self.ensure_started()?;
        validate_partition(partition)?;
        let partitions = self
            .partitions
            .read()
            .map_err(|_| PersistError::Backend("partition map poisoned".into()))?;
        Ok(partitions.get(partition).cloned().unwrap_or_else(empty_state))
    }
}
