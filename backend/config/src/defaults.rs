//! Default values for settings left out of the config file.

use crate::schema::{
    BotConfig, ConsoleConfig, LoggingConfig, MessagesConfig, OpbotConfig, PersisterConfig,
    PersisterKind,
};

pub const DEFAULT_BOT_NAME: &str = "opbot";
pub const DEFAULT_ASK_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DATA_DIR: &str = "./opbot-data";
pub const DEFAULT_SQLITE_PATH: &str = "./opbot.db";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_DIR: &str = "./logs";
pub const DEFAULT_ACCESS_DENIED: &str = "You do not have permission to run \"{command}\".";
pub const DEFAULT_NO_SUGGESTION: &str = "I don't know that command.";
pub const DEFAULT_COMMAND_ERROR: &str = "Something went wrong running that command.";
pub const DEFAULT_SLACK_WEBHOOK_PATH: &str = "/slack/events";
pub const DEFAULT_SLACK_BIND: &str = "0.0.0.0:3000";
pub const DEFAULT_CONSOLE_USER: &str = "console";
pub const DEFAULT_CONSOLE_CHANNEL: &str = "console";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: OpbotConfig) -> OpbotConfig {
    let config = apply_bot_defaults(config);
    let config = apply_persister_defaults(config);
    let config = apply_logging_defaults(config);
    let config = apply_message_defaults(config);
    let config = apply_slack_defaults(config);
    apply_console_defaults(config)
}

fn apply_bot_defaults(mut config: OpbotConfig) -> OpbotConfig {
    let bot = config.bot.get_or_insert_with(BotConfig::default);
    bot.name.get_or_insert_with(|| DEFAULT_BOT_NAME.to_string());
    bot.ask_timeout_secs.get_or_insert(DEFAULT_ASK_TIMEOUT_SECS);
    config
}

/// File storage by default; the path default depends on the kind.
fn apply_persister_defaults(mut config: OpbotConfig) -> OpbotConfig {
    let persister = config.persister.get_or_insert_with(PersisterConfig::default);
    let kind = *persister.kind.get_or_insert(PersisterKind::File);
    if persister.path.is_none() {
        persister.path = match kind {
            PersisterKind::File => Some(DEFAULT_DATA_DIR.to_string()),
            PersisterKind::Sqlite => Some(DEFAULT_SQLITE_PATH.to_string()),
            PersisterKind::Memory => None,
        };
    }
    config
}

fn apply_logging_defaults(mut config: OpbotConfig) -> OpbotConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    logging.level.get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
    logging.dir.get_or_insert_with(|| DEFAULT_LOG_DIR.to_string());
    config
}

fn apply_message_defaults(mut config: OpbotConfig) -> OpbotConfig {
    let messages = config.messages.get_or_insert_with(MessagesConfig::default);
    messages
        .access_denied
        .get_or_insert_with(|| DEFAULT_ACCESS_DENIED.to_string());
    messages
        .no_suggestion
        .get_or_insert_with(|| DEFAULT_NO_SUGGESTION.to_string());
    messages
        .command_error
        .get_or_insert_with(|| DEFAULT_COMMAND_ERROR.to_string());
    config
}

/// Only fills in a Slack section the user started; Slack stays off otherwise.
fn apply_slack_defaults(mut config: OpbotConfig) -> OpbotConfig {
    if let Some(slack) = &mut config.slack {
        slack
            .webhook_path
            .get_or_insert_with(|| DEFAULT_SLACK_WEBHOOK_PATH.to_string());
        slack.bind.get_or_insert_with(|| DEFAULT_SLACK_BIND.to_string());
    }
    config
}

fn apply_console_defaults(mut config: OpbotConfig) -> OpbotConfig {
    let console = config.console.get_or_insert_with(ConsoleConfig::default);
    console.user.get_or_insert_with(|| DEFAULT_CONSOLE_USER.to_string());
    console
        .channel
        .get_or_insert_with(|| DEFAULT_CONSOLE_CHANNEL.to_string());
    config
}
