/// Per-message control flow.
///
/// roles → handler check → address check → match → authorize → checkpoint →
/// reply. Every message ends in exactly one `Dispatched` or `DispatchError`;
/// none of them stops the loop.
use std::sync::Arc;

use opbot_core::{InboundMessage, NoRoles, RoleResolver, Transport};
use opbot_logging::{DispatchEvent, DispatchEventLogger};
use opbot_persist::Persister;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::auth::{authorize, resolve_roles};
use crate::bot::BotHandle;
use crate::brain::Brain;
use crate::checkpoint::Checkpoint;
use crate::error::DispatchError;
use crate::handlers::HandlerRegistry;
use crate::matcher::{match_tokens, NoMatch};
use crate::registry::CommandRegistry;
use crate::tokenizer::{normalize, tokenize};
use crate::types::CommandContext;

/// Address token position: commands start right after the bot's name.
const ADDRESS_OFFSET: usize = 1;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// User-facing texts for the non-command outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replies {
    /// `{command}` is replaced with the command name.
    pub access_denied: String,
    pub no_suggestion: String,
    pub command_error: String,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            access_denied: "You do not have permission to run \"{command}\".".into(),
            no_suggestion: "I don't know that command.".into(),
            command_error: "Something went wrong running that command.".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub name: String,
    pub aliases: Vec<String>,
    pub replies: Replies,
}

impl DispatcherSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            replies: Replies::default(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn replies(mut self, replies: Replies) -> Self {
        self.replies = replies;
        self
    }
}

/// A message that ran to a successful end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Ad-hoc handlers took the message; command matching was skipped.
    HandlerMatched { matched: usize },
    Completed { command: String, saved: bool },
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    bot: BotHandle,
    addresses: Vec<String>,
    replies: Replies,
    resolver: Arc<dyn RoleResolver>,
    checkpoint: Checkpoint,
}

impl Dispatcher {
    /// The persister must already be started.
    pub fn new(
        settings: DispatcherSettings,
        registry: CommandRegistry,
        transport: Arc<dyn Transport>,
        persister: Arc<dyn Persister>,
    ) -> Self {
        let addresses = std::iter::once(&settings.name)
            .chain(settings.aliases.iter())
            .map(|a| normalize(a))
            .filter(|a| !a.is_empty())
            .collect();

        let bot = BotHandle::new(
            settings.name,
            transport,
            HandlerRegistry::new(),
            Arc::new(registry),
        );

        Self {
            bot,
            addresses,
            replies: settings.replies,
            resolver: Arc::new(NoRoles),
            checkpoint: Checkpoint::new(persister, Arc::new(Brain::new())),
        }
    }

    /// Use `resolver` for role lookups instead of granting no roles.
    pub fn with_resolver(mut self, resolver: Arc<dyn RoleResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn bot(&self) -> &BotHandle {
        &self.bot
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        self.bot.handlers()
    }

    /// Whether the first token names this bot.
    pub fn is_addressed(&self, tokens: &[String]) -> bool {
        tokens
            .first()
            .map(|t| normalize(t))
            .is_some_and(|first| self.addresses.contains(&first))
    }

    /// Handle one inbound message.
    pub async fn on_message(&self, message: &InboundMessage) -> Result<Dispatched, DispatchError> {
        let roles = resolve_roles(self.resolver.as_ref(), &message.user).await;

        let report = self.bot.handlers().dispatch(message, &self.bot).await;
        if report.matched > 0 {
            DispatchEventLogger::log_event(
                &message.user,
                &message.channel,
                DispatchEvent::HandlerFired {
                    matched: report.matched,
                    failed: report.failed,
                },
            );
            return Ok(Dispatched::HandlerMatched {
                matched: report.matched,
            });
        }

        let tokens = tokenize(&message.text);
        if !self.is_addressed(&tokens) {
            return Err(DispatchError::NotAddressed);
        }

        let found = match match_tokens(self.bot.registry(), &tokens, ADDRESS_OFFSET, self.bot.name())
        {
            Ok(found) => found,
            Err(NoMatch { suggestion }) => {
                let text = suggestion
                    .clone()
                    .unwrap_or_else(|| self.replies.no_suggestion.clone());
                self.reply(message, &text).await;
                return Err(DispatchError::NoMatch { suggestion });
            }
        };
        let command = &found.command;

        if !authorize(command, &roles) {
            DispatchEventLogger::log_event(
                &message.user,
                &message.channel,
                DispatchEvent::AccessDenied {
                    command: command.name.clone(),
                    roles: roles.iter().cloned().collect(),
                },
            );
            let text = self.replies.access_denied.replace("{command}", &command.name);
            self.reply(message, &text).await;
            return Err(DispatchError::AccessDenied {
                command: command.name.clone(),
            });
        }

        DispatchEventLogger::log_event(
            &message.user,
            &message.channel,
            DispatchEvent::CommandInvoked {
                command: command.name.clone(),
                partition: command.partition.clone(),
                text: message.text.clone(),
            },
        );

        let ctx = CommandContext {
            message,
            syntax: &found.syntax,
            args: &found.args,
            roles: &roles,
            bot: &self.bot,
        };

        match self.checkpoint.run(command, &ctx).await {
            Ok(report) => {
                if let Some(text) = &report.response.text {
                    self.reply(message, text).await;
                }
                Ok(Dispatched::Completed {
                    command: command.name.clone(),
                    saved: report.saved,
                })
            }
            Err(e @ DispatchError::Persist(_)) => {
                self.reply(message, &self.replies.command_error).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn reply(&self, message: &InboundMessage, text: &str) {
        if let Err(e) = self.bot.send_message(text, &message.channel).await {
            warn!(channel = %message.channel, error = %e, "Failed to send reply");
        }
    }

    /// Consume the inbound queue, one task per message, until it closes.
    /// Messages already in flight finish before this returns.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<InboundMessage>) {
        info!(bot = %self.bot.name(), "Dispatcher started");
        let mut in_flight = JoinSet::new();

        while let Some(message) = rx.recv().await {
            while in_flight.try_join_next().is_some() {}

            let dispatcher = Arc::clone(&self);
            in_flight.spawn(async move {
                match dispatcher.on_message(&message).await {
                    Ok(outcome) => {
                        debug!(id = %message.id, ?outcome, "Message dispatched");
                    }
                    Err(DispatchError::NotAddressed) => {}
                    Err(e) => {
                        debug!(id = %message.id, user = %message.user, outcome = %e, "Message not completed");
                    }
                }
            });
        }

        info!(in_flight = in_flight.len(), "Inbound queue closed, dispatcher stopping");
        while in_flight.join_next().await.is_some() {}
    }
}
