//! opbot configuration schema.
//!
//! Every section is optional in the file; `apply_all_defaults` fills in what
//! the runtime needs and the accessors below read the result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root of `opbot.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpbotConfig {
    /// Bot identity and address tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<BotConfig>,

    /// Where command partitions are stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persister: Option<PersisterConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// Roles per chat user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeMap<String, Vec<String>>>,

    /// Reply texts for outcomes that are not command output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<MessagesConfig>,

    /// Slack Events API adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackConfig>,

    /// Identity used for stdin messages in console mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<ConsoleConfig>,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Seconds `ask me something` waits for an answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersisterKind {
    Memory,
    File,
    Sqlite,
}

impl fmt::Display for PersisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersisterKind::Memory => f.write_str("memory"),
            PersisterKind::File => f.write_str("file"),
            PersisterKind::Sqlite => f.write_str("sqlite"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersisterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PersisterKind>,
    /// Directory for `file`, database file for `sqlite`; unused for `memory`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesConfig {
    /// `{command}` is replaced with the command name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_denied: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

// ---------------------------------------------------------------------------
// Accessors (meaningful after `apply_all_defaults`)
// ---------------------------------------------------------------------------

impl OpbotConfig {
    pub fn bot_name(&self) -> &str {
        self.bot
            .as_ref()
            .and_then(|b| b.name.as_deref())
            .unwrap_or(crate::defaults::DEFAULT_BOT_NAME)
    }

    pub fn bot_aliases(&self) -> &[String] {
        self.bot.as_ref().map(|b| b.aliases.as_slice()).unwrap_or_default()
    }

    pub fn persister_kind(&self) -> PersisterKind {
        self.persister
            .as_ref()
            .and_then(|p| p.kind)
            .unwrap_or(PersisterKind::File)
    }

    pub fn persister_path(&self) -> Option<&str> {
        self.persister.as_ref().and_then(|p| p.path.as_deref())
    }

    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(crate::defaults::DEFAULT_LOG_LEVEL)
    }

    pub fn log_dir(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.dir.as_deref())
            .unwrap_or(crate::defaults::DEFAULT_LOG_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_yaml() {
        let yaml = r#"
bot:
  name: opbot
  aliases: ["@opbot"]
  askTimeoutSecs: 30
persister:
  kind: sqlite
  path: /var/lib/opbot/state.db
permissions:
  U123: [ADMIN, OPS]
messages:
  accessDenied: "Nope: {command}"
slack:
  botToken: xoxb-abc
  signingSecret: s3cret
"#;
        let config: OpbotConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bot_name(), "opbot");
        assert_eq!(config.bot_aliases(), ["@opbot"]);
        assert_eq!(config.bot.as_ref().unwrap().ask_timeout_secs, Some(30));
        assert_eq!(config.persister_kind(), PersisterKind::Sqlite);
        assert_eq!(config.persister_path(), Some("/var/lib/opbot/state.db"));
        assert_eq!(config.permissions.unwrap()["U123"], vec!["ADMIN", "OPS"]);
        assert_eq!(
            config.messages.unwrap().access_denied.as_deref(),
            Some("Nope: {command}")
        );
        assert_eq!(config.slack.unwrap().bot_token.as_deref(), Some("xoxb-abc"));
    }

    #[test]
    fn rejects_unknown_persister_kind() {
        let yaml = "persister:\n  kind: mongo\n";
        assert!(serde_yaml::from_str::<OpbotConfig>(yaml).is_err());
    }

    #[test]
    fn empty_document_is_default() {
        let config: OpbotConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, OpbotConfig::default());
    }
}
