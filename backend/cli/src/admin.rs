//! Subcommands that inspect or create config without starting the bot.

use std::path::Path;

use anyhow::{bail, Context, Result};
use opbot_commands::{builtin_commands, CommandRegistry};
use opbot_config::{
    apply_all_defaults, load_config, redact, resolve_env_vars, validate, write_config, OpbotConfig,
};

use crate::output::{note_error, note_success, note_warn, render_table};
use crate::runtime;

/// Print the effective config with secrets masked, then the validation
/// report. Fails when the config has errors.
pub async fn check_config(path: &Path) -> Result<()> {
    let raw = load_config(path).await?;
    let value = serde_json::to_value(&raw).context("Failed to serialize config")?;
    let value = resolve_env_vars(&value)?;
    let config: OpbotConfig = serde_json::from_value(value).context("Failed to read config")?;
    let config = apply_all_defaults(config);

    let shown = redact(&serde_json::to_value(&config)?);
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&shown)?);
    println!();

    let report = validate(&config);
    for warning in &report.warnings {
        note_warn(&warning.to_string());
    }
    for error in &report.errors {
        note_error(&error.to_string());
    }
    if !report.is_valid() {
        bail!("{} error(s) in {}", report.errors.len(), path.display());
    }
    note_success("Config is valid");
    Ok(())
}

/// Write a default config to `path`. Refuses to overwrite unless `force`.
pub async fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&apply_all_defaults(OpbotConfig::default()), path).await?;
    note_success(&format!("Wrote {}", path.display()));
    Ok(())
}

/// Table of every registered syntax, longest first.
pub fn list_commands(config: &OpbotConfig) -> String {
    let registry = CommandRegistry::from_commands(builtin_commands(
        runtime::permissions(config),
        runtime::ask_lifespan(config),
    ));
    let rows: Vec<Vec<String>> = registry
        .entries()
        .iter()
        .map(|entry| {
            vec![
                format!("{} {}", config.bot_name(), entry.syntax),
                entry.command.name.clone(),
                entry.command.partition.clone(),
                entry
                    .command
                    .roles
                    .as_ref()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".into()),
            ]
        })
        .collect();
    render_table(&["SYNTAX", "COMMAND", "PARTITION", "ROLES"], &rows)
}
