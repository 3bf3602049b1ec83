//! Config validation: every problem found in one pass, with the config path
//! it belongs to.

use crate::schema::{OpbotConfig, PersisterKind};
use std::net::SocketAddr;
use thiserror::Error;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate a config that has been through `apply_all_defaults`.
pub fn validate(config: &OpbotConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_bot(config, &mut report);
    validate_persister(config, &mut report);
    validate_logging(config, &mut report);
    validate_permissions(config, &mut report);
    validate_slack(config, &mut report);
    report
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(str::trim).is_none_or(str::is_empty)
}

/// The bot name and aliases are matched as a single token.
fn validate_bot(config: &OpbotConfig, report: &mut ValidationReport) {
    let Some(bot) = &config.bot else { return };
    match bot.name.as_deref() {
        Some(name) if name.trim().is_empty() => {
            report.error("bot.name", "Bot name cannot be empty");
        }
        Some(name) if name.contains(char::is_whitespace) => {
            report.error("bot.name", format!("Bot name '{name}' must be a single word"));
        }
        _ => {}
    }
    for (i, alias) in bot.aliases.iter().enumerate() {
        if alias.trim().is_empty() || alias.contains(char::is_whitespace) {
            report.error(
                format!("bot.aliases[{i}]"),
                format!("Alias '{alias}' must be a single non-empty word"),
            );
        }
    }
    if bot.ask_timeout_secs == Some(0) {
        report.error("bot.askTimeoutSecs", "askTimeoutSecs must be >= 1");
    }
}

fn validate_persister(config: &OpbotConfig, report: &mut ValidationReport) {
    let Some(persister) = &config.persister else { return };
    match persister.kind {
        Some(kind @ (PersisterKind::File | PersisterKind::Sqlite))
            if is_blank(persister.path.as_deref()) =>
        {
            report.error("persister.path", format!("The {kind} persister needs a path"));
        }
        Some(PersisterKind::Memory) => {
            report.warn("persister.kind", "Memory persister: state is lost on restart");
        }
        _ => {}
    }
}

fn validate_logging(config: &OpbotConfig, report: &mut ValidationReport) {
    let Some(level) = config.logging.as_ref().and_then(|l| l.level.as_deref()) else {
        return;
    };
    if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        report.warn(
            "logging.level",
            format!("'{level}' is not a plain level; it will be read as a filter directive"),
        );
    }
}

fn validate_permissions(config: &OpbotConfig, report: &mut ValidationReport) {
    let Some(permissions) = &config.permissions else { return };
    for (user, roles) in permissions {
        let path = format!("permissions.{user}");
        if user.trim().is_empty() {
            report.error("permissions", "User id cannot be empty");
        }
        if roles.is_empty() {
            report.warn(&path, "User has no roles listed");
        }
        if roles.iter().any(|r| r.trim().is_empty()) {
            report.error(&path, "Role names cannot be empty");
        }
    }
}

fn validate_slack(config: &OpbotConfig, report: &mut ValidationReport) {
    let Some(slack) = &config.slack else { return };
    if is_blank(slack.bot_token.as_deref()) {
        report.error("slack.botToken", "Slack bot token is required");
    }
    if is_blank(slack.signing_secret.as_deref()) {
        report.error("slack.signingSecret", "Slack signing secret is required");
    }
    if let Some(path) = slack.webhook_path.as_deref() {
        if !path.starts_with('/') {
            report.error("slack.webhookPath", "webhookPath must start with '/'");
        }
    }
    if let Some(bind) = slack.bind.as_deref() {
        if bind.parse::<SocketAddr>().is_err() {
            report.error("slack.bind", format!("'{bind}' is not a socket address"));
        }
    }
}
