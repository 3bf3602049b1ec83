/// File-backed persister: one JSON document per partition.
///
/// Layout is `<dir>/<partition>.json`. Writes go to a temp file first and are
/// renamed into place, so a crash mid-write leaves the previous state intact.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use crate::error::PersistError;
use crate::store::{empty_state, validate_partition, Persister};

const PROBE_FILE_NAME: &str = ".opbot-write-probe";

pub struct FilePersister {
    dir: PathBuf,
    started: AtomicBool,
}

impl FilePersister {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            started: AtomicBool::new(false),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn partition_path(&self, partition: &str) -> PathBuf {
        self.dir.join(format!("{partition}.json"))
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
impl Persister for FilePersister {
    fn name(&self) -> &str {
        "file"
    }

    async fn start(&self) -> Result<(), PersistError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(PersistError::AlreadyInitialized);
        }

        fs::create_dir_all(&self.dir).await.map_err(|e| {
            PersistError::WriteDenied(format!("cannot create {}: {e}", self.dir.display()))
        })?;

        // Permission check: the directory must accept a write.
        let probe = self.dir.join(PROBE_FILE_NAME);
        fs::write(&probe, b"ok").await.map_err(|e| {
            PersistError::WriteDenied(format!("cannot write to {}: {e}", self.dir.display()))
        })?;
        let _ = fs::remove_file(&probe).await;

        self.started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| PersistError::AlreadyInitialized)?;

        info!(dir = %self.dir.display(), "File persister started");
        Ok(())
    }

    async fn save(&self, state: &Value, partition: &str) -> Result<(), PersistError> {
        self.ensure_started()?;
        validate_partition(partition)?;

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| PersistError::InvalidState(e.to_string()))?;

        let path = self.partition_path(partition);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &json).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!(partition, path = %path.display(), "Saved partition");
        Ok(())
    }

    async fn recover(&self, partition: &str) -> Result<Value, PersistError> {
        self.ensure_started()?;
        validate_partition(partition)?;

        let path = self.partition_path(partition);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(empty_state()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&raw).map_err(|e| {
            PersistError::Backend(format!("corrupt partition file {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_not_initialized_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let persister = FilePersister::new(dir.path());
        assert_eq!(
            persister.save(&json!({"obj": 2}), "numbers").await,
            Err(PersistError::NotInitialized)
        );
        assert_eq!(persister.recover("numbers").await, Err(PersistError::NotInitialized));
    }

    #[tokio::test]
    async fn test_start_creates_dir_and_rejects_second_start() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("data");
        let persister = FilePersister::new(&data_dir);
        persister.start().await.unwrap();
        assert!(data_dir.is_dir());
        assert!(!data_dir.join(PROBE_FILE_NAME).exists());
        assert_eq!(persister.start().await, Err(PersistError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn test_start_fails_when_path_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("occupied");
        std::fs::write(&file_path, b"not a directory").unwrap();

        let persister = FilePersister::new(&file_path);
        assert!(matches!(
            persister.start().await,
            Err(PersistError::WriteDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_roundtrip_and_missing_partition() {
        let dir = tempfile::tempdir().unwrap();
        let persister = FilePersister::new(dir.path());
        persister.start().await.unwrap();

        assert_eq!(persister.recover("numbers").await.unwrap(), json!({}));

        persister
            .save(&json!({"served": 1, "last": "U1"}), "numbers")
            .await
            .unwrap();
        assert_eq!(
            persister.recover("numbers").await.unwrap(),
            json!({"served": 1, "last": "U1"})
        );
        assert!(dir.path().join("numbers.json").exists());
        assert!(!dir.path().join("numbers.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        let persister = FilePersister::new(dir.path());
        persister.start().await.unwrap();
        assert!(matches!(
            persister.recover("broken").await,
            Err(PersistError::Backend(_))
        ));
    }
}
