/// Built-in commands shipped with the bot.
use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opbot_core::InboundMessage;
use opbot_security::PermissionTable;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::bot::BotHandle;
use crate::handlers::{HandlerAction, HandlerOptions};
use crate::types::{Command, CommandContext, CommandHandler, CommandResponse, RoleRequirement};

/// How long `ask me something` waits for an answer.
pub const DEFAULT_ASK_LIFESPAN: Duration = Duration::from_secs(60);

/// Role needed to change other users' roles.
pub const ADMIN_ROLE: &str = "ADMIN";

pub fn builtin_commands(permissions: PermissionTable, ask_lifespan: Duration) -> Vec<Command> {
    vec![
        Command::builder("help", HelpCommand)
            .description("List every command and how to call it.")
            .build(),
        Command::builder("whoami", WhoAmICommand)
            .description("Show your user id and roles.")
            .build(),
        Command::builder("twelve", TwelveCommand)
            .description("Reply with the number twelve.")
            .syntax(["give", "me", "twelve"])
            .syntax("twelve")
            .partition("numbers")
            .build(),
        Command::builder("counter", CounterCommand)
            .description("A shared counter.")
            .syntax(["count", "up"])
            .syntax(["count", "show"])
            .syntax(["count", "reset"])
            .build(),
        Command::builder("remember", RememberCommand)
            .description("Store a note for later.")
            .partition("notes")
            .build(),
        Command::builder("recall", RecallCommand)
            .description("List the notes you stored.")
            .partition("notes")
            .build(),
        Command::builder("grant", GrantCommand::grant(permissions.clone()))
            .description("Give a user a role: grant <user> <role>.")
            .roles(RoleRequirement::new().role(ADMIN_ROLE))
            .partition("permissions")
            .build(),
        Command::builder("revoke", GrantCommand::revoke(permissions))
            .description("Take a role away: revoke <user> <role>.")
            .roles(RoleRequirement::new().role(ADMIN_ROLE))
            .partition("permissions")
            .build(),
        Command::builder("ask", AskCommand::new(ask_lifespan))
            .description("Ask you a question and wait for the answer.")
            .syntax(["ask", "me", "something"])
            .build(),
    ]
}

// ----- State helpers -----

fn load<T: DeserializeOwned + Default>(state: &Value) -> Result<T> {
    if state.as_object().is_some_and(|o| o.is_empty()) {
        return Ok(T::default());
    }
    serde_json::from_value(state.clone()).context("malformed partition state")
}

fn store<T: Serialize>(state: &mut Value, value: &T) -> Result<()> {
    *state = serde_json::to_value(value).context("serializing partition state")?;
    Ok(())
}

// ----- help / whoami -----

struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn handle(&self, ctx: &CommandContext<'_>, _state: &mut Value) -> Result<CommandResponse> {
        let bot = ctx.bot.name();
        let lines: Vec<String> = ctx
            .bot
            .registry()
            .commands()
            .iter()
            .map(|command| {
                let syntaxes: Vec<String> = command
                    .syntaxes
                    .iter()
                    .map(|s| format!("`{bot} {s}`"))
                    .collect();
                let mut line = format!("{}: {}", command.name, syntaxes.join(", "));
                if !command.description.is_empty() {
                    line.push_str(&format!(" - {}", command.description));
                }
                if let Some(roles) = &command.roles {
                    line.push_str(&format!(" (requires {roles})"));
                }
                line
            })
            .collect();
        Ok(CommandResponse::reply(lines.join("\n")))
    }
}

struct WhoAmICommand;

#[async_trait]
impl CommandHandler for WhoAmICommand {
    async fn handle(&self, ctx: &CommandContext<'_>, _state: &mut Value) -> Result<CommandResponse> {
        let roles = if ctx.roles.is_empty() {
            "none".to_string()
        } else {
            ctx.roles.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        Ok(CommandResponse::reply(format!(
            "You are {}. Roles: {roles}",
            ctx.message.user
        )))
    }
}

// ----- twelve -----

#[derive(Debug, Default, Serialize, Deserialize)]
struct NumbersState {
    #[serde(default)]
    served: u64,
}

struct TwelveCommand;

#[async_trait]
impl CommandHandler for TwelveCommand {
    async fn handle(&self, _ctx: &CommandContext<'_>, state: &mut Value) -> Result<CommandResponse> {
        let mut numbers: NumbersState = load(state)?;
        numbers.served += 1;
        store(state, &numbers)?;
        Ok(CommandResponse::reply("12"))
    }
}

// ----- counter -----

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterState {
    #[serde(default)]
    count: i64,
}

struct CounterCommand;

#[async_trait]
impl CommandHandler for CounterCommand {
    async fn handle(&self, ctx: &CommandContext<'_>, state: &mut Value) -> Result<CommandResponse> {
        let mut counter: CounterState = load(state)?;
        match ctx.syntax.key().as_str() {
            "count up" => counter.count += 1,
            "count reset" => counter.count = 0,
            _ => {}
        }
        store(state, &counter)?;
        Ok(CommandResponse::reply(format!("Count is {}", counter.count)))
    }
}

// ----- remember / recall -----

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Note {
    text: String,
    at: DateTime<Utc>,
}

/// Notes keyed by user id.
#[derive(Debug, Default, Serialize, Deserialize)]
struct NotesState {
    #[serde(default)]
    notes: BTreeMap<String, Vec<Note>>,
}

struct RememberCommand;

#[async_trait]
impl CommandHandler for RememberCommand {
    async fn handle(&self, ctx: &CommandContext<'_>, state: &mut Value) -> Result<CommandResponse> {
        let text = ctx.raw_args();
        if text.is_empty() {
            return Ok(CommandResponse::reply("Remember what?"));
        }
        let mut notes: NotesState = load(state)?;
        let entries = notes.notes.entry(ctx.message.user.clone()).or_default();
        entries.push(Note {
            text,
            at: Utc::now(),
        });
        let count = entries.len();
        store(state, &notes)?;
        Ok(CommandResponse::reply(format!("Noted. You have {count} note(s).")))
    }
}

struct RecallCommand;

#[async_trait]
impl CommandHandler for RecallCommand {
    async fn handle(&self, ctx: &CommandContext<'_>, state: &mut Value) -> Result<CommandResponse> {
        let notes: NotesState = load(state)?;
        let Some(entries) = notes.notes.get(&ctx.message.user).filter(|e| !e.is_empty()) else {
            return Ok(CommandResponse::reply("You have no notes."));
        };
        let lines: Vec<String> = entries
            .iter()
            .enumerate()
            .map(|(i, note)| format!("{}. {}", i + 1, note.text))
            .collect();
        Ok(CommandResponse::reply(lines.join("\n")))
    }
}

// ----- grant / revoke -----

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoleChange {
    action: String,
    user: String,
    role: String,
    by: String,
    at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PermissionLog {
    #[serde(default)]
    changes: Vec<RoleChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoleAction {
    Grant,
    Revoke,
}

struct GrantCommand {
    permissions: PermissionTable,
    action: RoleAction,
}

impl GrantCommand {
    fn grant(permissions: PermissionTable) -> Self {
        Self {
            permissions,
            action: RoleAction::Grant,
        }
    }

    fn revoke(permissions: PermissionTable) -> Self {
        Self {
            permissions,
            action: RoleAction::Revoke,
        }
    }
}

#[async_trait]
impl CommandHandler for GrantCommand {
    async fn handle(&self, ctx: &CommandContext<'_>, state: &mut Value) -> Result<CommandResponse> {
        let verb = match self.action {
            RoleAction::Grant => "grant",
            RoleAction::Revoke => "revoke",
        };
        let [user, role] = ctx.args else {
            return Ok(CommandResponse::reply(format!(
                "Usage: {} {verb} <user> <role>",
                ctx.bot.name()
            )));
        };

        let changed = match self.action {
            RoleAction::Grant => self.permissions.add_permission(user, role),
            RoleAction::Revoke => self.permissions.remove_permission(user, role),
        };
        if !changed {
            let text = match self.action {
                RoleAction::Grant => format!("{user} already has {role}."),
                RoleAction::Revoke => format!("{user} does not have {role}."),
            };
            return Ok(CommandResponse::reply(text));
        }

        let mut log: PermissionLog = load(state)?;
        log.changes.push(RoleChange {
            action: verb.to_string(),
            user: user.clone(),
            role: role.clone(),
            by: ctx.message.user.clone(),
            at: Utc::now(),
        });
        store(state, &log)?;
        info!(user = %user, role = %role, by = %ctx.message.user, action = verb, "Role changed");

        let text = match self.action {
            RoleAction::Grant => format!("Granted {role} to {user}."),
            RoleAction::Revoke => format!("Revoked {role} from {user}."),
        };
        Ok(CommandResponse::reply(text))
    }
}

// ----- ask me something -----

#[derive(Debug, Default, Serialize, Deserialize)]
struct AskState {
    #[serde(default)]
    asked: u64,
}

struct AskCommand {
    lifespan: Duration,
}

impl AskCommand {
    fn new(lifespan: Duration) -> Self {
        Self { lifespan }
    }
}

#[async_trait]
impl CommandHandler for AskCommand {
    async fn handle(&self, ctx: &CommandContext<'_>, state: &mut Value) -> Result<CommandResponse> {
        let mut ask: AskState = load(state)?;
        ask.asked += 1;
        store(state, &ask)?;

        // Armed last: a failed body must not leave a handler behind.
        let user = ctx.message.user.clone();
        let channel = ctx.message.channel.clone();

        let bot = ctx.bot.clone();
        let timeout_channel = channel.clone();
        let options = HandlerOptions::expiring(self.lifespan).on_expire(move || {
            tokio::spawn(async move {
                if let Err(e) = bot
                    .send_message("I stopped waiting for an answer.", &timeout_channel)
                    .await
                {
                    warn!(error = %e, "Failed to send timeout notice");
                }
            });
        });

        ctx.bot.handlers().add_one_off_handler(
            move |m: &InboundMessage| m.user == user && m.channel == channel,
            AnswerAction,
            options,
        );

        Ok(CommandResponse::reply("What's on your mind?"))
    }
}

struct AnswerAction;

#[async_trait]
impl HandlerAction for AnswerAction {
    async fn run(&self, message: &InboundMessage, bot: &BotHandle) -> Result<()> {
        bot.send_message(&format!("Got it: {}", message.text), &message.channel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatched, Dispatcher, DispatcherSettings};
    use crate::error::DispatchError;
    use crate::registry::CommandRegistry;
    use crate::test_support::RecordingTransport;
    use opbot_persist::{MemoryPersister, Persister};
    use serde_json::json;
    use std::sync::Arc;

    struct Setup {
        dispatcher: Dispatcher,
        transport: Arc<RecordingTransport>,
        persister: Arc<MemoryPersister>,
        permissions: PermissionTable,
    }

    async fn setup(ask_lifespan: Duration) -> Setup {
        let permissions = PermissionTable::new();
        permissions.add_permission("admin", ADMIN_ROLE);
        let registry =
            CommandRegistry::from_commands(builtin_commands(permissions.clone(), ask_lifespan));
        let transport = Arc::new(RecordingTransport::default());
        let persister = Arc::new(MemoryPersister::new());
        persister.start().await.unwrap();
        let dispatcher = Dispatcher::new(
            DispatcherSettings::new("opbot"),
            registry,
            transport.clone(),
            persister.clone(),
        )
        .with_resolver(Arc::new(permissions.clone()));
        Setup {
            dispatcher,
            transport,
            persister,
            permissions,
        }
    }

    async fn say(setup: &Setup, user: &str, text: &str) -> Result<Dispatched, DispatchError> {
        setup
            .dispatcher
            .on_message(&InboundMessage::new(text, user, "C1"))
            .await
    }

    fn last_reply(setup: &Setup) -> String {
        setup.transport.texts().pop().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_twelve_counts_served() {
        let s = setup(DEFAULT_ASK_LIFESPAN).await;
        say(&s, "u", "opbot twelve").await.unwrap();
        say(&s, "u", "opbot give me twelve").await.unwrap();
        assert_eq!(s.transport.texts(), vec!["12", "12"]);
        assert_eq!(s.persister.recover("numbers").await.unwrap(), json!({"served": 2}));
    }

    #[tokio::test]
    async fn test_counter_branches_on_syntax() {
        let s = setup(DEFAULT_ASK_LIFESPAN).await;
        say(&s, "u", "opbot count up").await.unwrap();
        say(&s, "u", "opbot count up").await.unwrap();
        say(&s, "u", "opbot count show").await.unwrap();
        assert_eq!(last_reply(&s), "Count is 2");
        say(&s, "u", "opbot count reset").await.unwrap();
        assert_eq!(last_reply(&s), "Count is 0");
    }

    #[tokio::test]
    async fn test_notes_are_per_user() {
        let s = setup(DEFAULT_ASK_LIFESPAN).await;
        say(&s, "alice", "opbot remember buy milk").await.unwrap();
        say(&s, "alice", "opbot remember call Bob").await.unwrap();
        say(&s, "bob", "opbot recall").await.unwrap();
        assert_eq!(last_reply(&s), "You have no notes.");
        say(&s, "alice", "opbot recall").await.unwrap();
        assert_eq!(last_reply(&s), "1. buy milk\n2. call Bob");
    }

    #[tokio::test]
    async fn test_malformed_partition_fails_body() {
        let s = setup(DEFAULT_ASK_LIFESPAN).await;
        s.persister.save(&json!({"served": "lots"}), "numbers").await.unwrap();
        let err = say(&s, "u", "opbot twelve").await.unwrap_err();
        assert!(matches!(err, DispatchError::CommandBody { .. }));
    }

    #[tokio::test]
    async fn test_grant_requires_admin() {
        let s = setup(DEFAULT_ASK_LIFESPAN).await;
        let err = say(&s, "mallory", "opbot grant mallory ADMIN").await.unwrap_err();
        assert!(matches!(err, DispatchError::AccessDenied { .. }));
        assert!(s.permissions.permissions("mallory").is_empty());

        say(&s, "admin", "opbot grant carol OPS").await.unwrap();
        assert_eq!(last_reply(&s), "Granted OPS to carol.");
        say(&s, "carol", "opbot whoami").await.unwrap();
        assert_eq!(last_reply(&s), "You are carol. Roles: OPS");

        say(&s, "admin", "opbot revoke carol OPS").await.unwrap();
        assert!(s.permissions.permissions("carol").is_empty());
        let log = s.persister.recover("permissions").await.unwrap();
        assert_eq!(log["changes"].as_array().map(Vec::len), Some(2));

        say(&s, "admin", "opbot grant carol").await.unwrap();
        assert_eq!(last_reply(&s), "Usage: opbot grant <user> <role>");
    }

    #[tokio::test]
    async fn test_help_lists_commands() {
        let s = setup(DEFAULT_ASK_LIFESPAN).await;
        say(&s, "u", "opbot help").await.unwrap();
        let help = last_reply(&s);
        assert!(help.contains("`opbot give me twelve`"));
        assert!(help.contains("grant: `opbot grant`"));
        assert!(help.contains("(requires ADMIN)"));
    }

    #[tokio::test]
    async fn test_ask_waits_for_one_answer() {
        let s = setup(DEFAULT_ASK_LIFESPAN).await;
        say(&s, "u", "opbot ask me something").await.unwrap();
        assert_eq!(last_reply(&s), "What's on your mind?");

        // Someone else talking does not consume the handler.
        assert!(say(&s, "other", "chatter").await.is_err());

        let answered = say(&s, "u", "blue").await.unwrap();
        assert_eq!(answered, Dispatched::HandlerMatched { matched: 1 });
        assert_eq!(last_reply(&s), "Got it: blue");

        assert!(matches!(
            say(&s, "u", "green").await,
            Err(DispatchError::NotAddressed)
        ));
    }

    #[tokio::test]
    async fn test_ask_times_out() {
        let s = setup(Duration::from_millis(50)).await;
        say(&s, "u", "opbot ask me something").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(last_reply(&s), "I stopped waiting for an answer.");
        assert!(s.dispatcher.handlers().is_empty());
    }

    #[tokio::test]
    async fn test_ask_with_malformed_state_arms_nothing() {
        let s = setup(DEFAULT_ASK_LIFESPAN).await;
        s.persister.save(&json!({"asked": "many"}), "ask").await.unwrap();

        let err = say(&s, "u", "opbot ask me something").await.unwrap_err();
        assert!(matches!(err, DispatchError::CommandBody { .. }));
        assert_eq!(s.dispatcher.handlers().counts(), (0, 0));

        // The next command is dispatched normally instead of being taken as an answer.
        let next = say(&s, "u", "opbot twelve").await.unwrap();
        assert!(matches!(next, Dispatched::Completed { .. }));
        assert_eq!(last_reply(&s), "12");
    }
}
