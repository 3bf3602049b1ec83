/// Per-partition locks.
///
/// A command invocation holds its partition's lock from recover to save, so
/// two messages hitting the same partition run their read-modify-write one
/// after the other instead of racing. Different partitions never block each
/// other. The state itself lives only in the persister.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held for the duration of one invocation against a partition.
pub type PartitionGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct Brain {
    partitions: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Brain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusively lock `partition` until the guard is dropped.
    pub async fn lock(&self, partition: &str) -> PartitionGuard {
        let lock = {
            let mut map = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(partition.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
