use opbot_persist::PersistError;
use thiserror::Error;

/// Why a message did not run a command to completion.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The message is not for this bot.
    #[error("message not addressed to the bot")]
    NotAddressed,

    #[error("no command matched")]
    NoMatch { suggestion: Option<String> },

    #[error("access denied to command {command}")]
    AccessDenied { command: String },

    #[error("persister error: {0}")]
    Persist(#[from] PersistError),

    #[error("command {command} failed: {message}")]
    CommandBody { command: String, message: String },
}
