//! Config file read/write with backup rotation.

use crate::schema::OpbotConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAME: &str = "opbot.yaml";

/// Number of rolling backups kept by `write_config`.
const MAX_BACKUPS: usize = 3;

/// `OPBOT_CONFIG_DIR` if set, else `~/.opbot`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("OPBOT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|home| home.join(".opbot"))
        .unwrap_or_else(|| PathBuf::from(".opbot"))
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Parse the config at `path`. A missing file yields the default config.
pub async fn load_config(path: &Path) -> Result<OpbotConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(OpbotConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file parses as YAML null.
    if raw.trim().is_empty() {
        return Ok(OpbotConfig::default());
    }

    let config: OpbotConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Write `config` atomically, keeping the previous file as `.bak.1`.
pub async fn write_config(config: &OpbotConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create config directory: {}", parent.display())
        })?;
    }

    if path.exists() {
        rotate_backups(path).await;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml.as_bytes())
        .await
        .with_context(|| format!("Failed to write temp config: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp config to: {}", path.display()))?;

    info!(path = %path.display(), "Wrote config");
    Ok(())
}

/// opbot.yaml.bak.1 → .bak.2 → … → .bak.N, then copy the current file to .bak.1.
async fn rotate_backups(path: &Path) {
    for i in (1..MAX_BACKUPS).rev() {
        let old = path.with_extension(format!("yaml.bak.{i}"));
        let new = path.with_extension(format!("yaml.bak.{}", i + 1));
        if old.exists() {
            if let Err(e) = fs::rename(&old, &new).await {
                warn!(backup = %old.display(), error = %e, "Failed to rotate backup");
            }
        }
    }

    let bak = path.with_extension("yaml.bak.1");
    if let Err(e) = fs::copy(path, &bak).await {
        warn!(backup = %bak.display(), error = %e, "Failed to create backup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BotConfig;

    #[tokio::test]
    async fn missing_and_empty_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());
        assert_eq!(load_config(&path).await.unwrap(), OpbotConfig::default());

        std::fs::write(&path, "\n").unwrap();
        assert_eq!(load_config(&path).await.unwrap(), OpbotConfig::default());
    }

    #[tokio::test]
    async fn write_then_load_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());

        let mut config = OpbotConfig::default();
        config.bot = Some(BotConfig {
            name: Some("first".into()),
            ..Default::default()
        });
        write_config(&config, &path).await.unwrap();

        config.bot.as_mut().unwrap().name = Some("second".into());
        write_config(&config, &path).await.unwrap();

        assert_eq!(load_config(&path).await.unwrap().bot_name(), "second");
        let backup = std::fs::read_to_string(path.with_extension("yaml.bak.1")).unwrap();
        assert!(backup.contains("first"));
    }

    #[tokio::test]
    async fn malformed_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());
        std::fs::write(&path, "bot: [unterminated").unwrap();
        let err = load_config(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config YAML"));
    }
}
