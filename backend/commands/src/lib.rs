//! Command dispatch for opbot.
//!
//! Turns inbound chat messages into command invocations: tokenize, check
//! ad-hoc handlers, match the longest registered syntax (with a fuzzy
//! "did you mean" fallback), gate on roles, and run the command body between
//! a partition recover and save.

pub mod auth;
pub mod bot;
pub mod brain;
pub mod builtins;
pub mod checkpoint;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod matcher;
pub mod registry;
pub mod similarity;
pub mod tokenizer;
pub mod types;

#[cfg(test)]
mod test_support;

pub use auth::{authorize, resolve_roles};
pub use bot::BotHandle;
pub use brain::Brain;
pub use builtins::{builtin_commands, ADMIN_ROLE, DEFAULT_ASK_LIFESPAN};
pub use checkpoint::{Checkpoint, CheckpointReport};
pub use dispatch::{Dispatched, Dispatcher, DispatcherSettings, Replies};
pub use error::DispatchError;
pub use handlers::{
    HandlerAction, HandlerId, HandlerKind, HandlerOptions, HandlerRegistry, HandlerReport,
};
pub use matcher::{match_tokens, Match, NoMatch};
pub use registry::CommandRegistry;
pub use types::{
    Command, CommandBuilder, CommandContext, CommandHandler, CommandResponse, RoleRequirement,
    RoleSet, Syntax,
};

use opbot_security::PermissionTable;

/// Registry holding every built-in command.
pub fn build_default_registry(permissions: PermissionTable) -> CommandRegistry {
    CommandRegistry::from_commands(builtin_commands(permissions, DEFAULT_ASK_LIFESPAN))
}
