//! `opbot-config`: the `opbot.yaml` runtime configuration.
//!
//! - Typed schema (bot identity, persister, logging, permissions, replies,
//!   Slack, console)
//! - YAML read/write with backup rotation
//! - `${ENV_VAR}` substitution
//! - Defaults and validation
//! - Secret redaction for display

pub mod defaults;
pub mod env;
pub mod io;
pub mod redact;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{collect_referenced_vars, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, write_config};
pub use redact::redact;
pub use schema::{
    BotConfig, ConsoleConfig, LoggingConfig, MessagesConfig, OpbotConfig, PersisterConfig,
    PersisterKind, SlackConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Load, substitute env vars, apply defaults and validate.
///
/// Warnings are logged; any validation error fails the load.
pub async fn load_and_prepare(path: &Path) -> Result<OpbotConfig> {
    prepare_with(path, &std::env::vars().collect()).await
}

/// `load_and_prepare` with an explicit environment.
pub async fn prepare_with(path: &Path, env: &HashMap<String, String>) -> Result<OpbotConfig> {
    let raw_config = load_config(path).await?;

    let value: Value =
        serde_json::to_value(&raw_config).context("Failed to serialize config for processing")?;
    let value = resolve_env_vars_with(&value, env)
        .with_context(|| format!("Failed to resolve env vars in {}", path.display()))?;
    let config: OpbotConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;

    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    if !report.is_valid() {
        for error in &report.errors {
            tracing::error!(path = %error.path, message = %error.message, "Config error");
        }
        let summary: Vec<String> = report.errors.iter().map(|e| e.to_string()).collect();
        bail!("Invalid config {}:\n{}", path.display(), summary.join("\n"));
    }

    Ok(config)
}
