/// Load / execute / save around a command body.
///
/// The partition is recovered from the persister, handed to the body as
/// `&mut Value`, and saved again only if the body returns `Ok`. A failed save
/// is logged and not retried; the reply the body produced still stands.
use std::sync::Arc;

use opbot_logging::{DispatchEvent, DispatchEventLogger};
use opbot_persist::Persister;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::brain::Brain;
use crate::error::DispatchError;
use crate::types::{Command, CommandContext, CommandResponse};

/// Result of a body that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointReport {
    pub response: CommandResponse,
    /// Whether the state made it back to the persister.
    pub saved: bool,
}

pub struct Checkpoint {
    persister: Arc<dyn Persister>,
    brain: Arc<Brain>,
}

impl Checkpoint {
    pub fn new(persister: Arc<dyn Persister>, brain: Arc<Brain>) -> Self {
        Self { persister, brain }
    }

    pub fn persister(&self) -> &Arc<dyn Persister> {
        &self.persister
    }

    pub async fn run(
        &self,
        command: &Command,
        ctx: &CommandContext<'_>,
    ) -> Result<CheckpointReport, DispatchError> {
        let partition = command.partition.as_str();
        let _guard = self.brain.lock(partition).await;

        let mut state: Value = match self.persister.recover(partition).await {
            Ok(state) => state,
            Err(e) => {
                error!(command = %command.name, partition, error = %e, "Failed to recover partition");
                self.report_failure(command, ctx, "recover", &e.to_string());
                return Err(e.into());
            }
        };
        debug!(command = %command.name, partition, "Partition recovered");

        let response = match command.handler.handle(ctx, &mut state).await {
            Ok(response) => response,
            Err(e) => {
                warn!(command = %command.name, error = %format!("{e:#}"), "Command body failed");
                return Err(DispatchError::CommandBody {
                    command: command.name.clone(),
                    message: format!("{e:#}"),
                });
            }
        };

        let saved = match self.persister.save(&state, partition).await {
            Ok(()) => true,
            Err(e) => {
                error!(command = %command.name, partition, error = %e, "Failed to save partition");
                self.report_failure(command, ctx, "save", &e.to_string());
                false
            }
        };

        Ok(CheckpointReport { response, saved })
    }

    fn report_failure(&self, command: &Command, ctx: &CommandContext<'_>, stage: &str, error: &str) {
        DispatchEventLogger::log_event(
            &ctx.message.user,
            &ctx.message.channel,
            DispatchEvent::CheckpointFailed {
                command: command.name.clone(),
                partition: command.partition.clone(),
                stage: stage.to_string(),
                error: error.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_bot, FlakyPersister};
    use crate::types::{CommandHandler, RoleSet, Syntax};
    use async_trait::async_trait;
    use opbot_core::InboundMessage;
    use opbot_persist::{MemoryPersister, PersistError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Increments `hits` in its partition and replies with the new value.
    struct Tally(Arc<AtomicUsize>);

    #[async_trait]
    impl CommandHandler for Tally {
        async fn handle(
            &self,
            _ctx: &CommandContext<'_>,
            state: &mut Value,
        ) -> anyhow::Result<CommandResponse> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let hits = state["hits"].as_u64().unwrap_or(0) + 1;
            state["hits"] = json!(hits);
            Ok(CommandResponse::reply(hits.to_string()))
        }
    }

    struct Explode;

    #[async_trait]
    impl CommandHandler for Explode {
        async fn handle(
            &self,
            _ctx: &CommandContext<'_>,
            state: &mut Value,
        ) -> anyhow::Result<CommandResponse> {
            state["half"] = json!("written");
            anyhow::bail!("bad input")
        }
    }

    async fn run_once(checkpoint: &Checkpoint, command: &Command) -> Result<CheckpointReport, DispatchError> {
        let (bot, _) = test_bot();
        let message = InboundMessage::new("bot tally", "u", "C1");
        let syntax = Syntax::from("tally");
        let roles = RoleSet::new();
        let ctx = CommandContext {
            message: &message,
            syntax: &syntax,
            args: &[],
            roles: &roles,
            bot: &bot,
        };
        checkpoint.run(command, &ctx).await
    }

    async fn started_memory() -> Arc<MemoryPersister> {
        let persister = Arc::new(MemoryPersister::new());
        persister.start().await.unwrap();
        persister
    }

    #[tokio::test]
    async fn test_state_round_trips_through_persister() {
        let persister = started_memory().await;
        let checkpoint = Checkpoint::new(persister.clone(), Arc::new(Brain::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let command = Command::builder("tally", Tally(calls.clone())).build();

        let first = run_once(&checkpoint, &command).await.unwrap();
        let second = run_once(&checkpoint, &command).await.unwrap();

        assert_eq!(first.response, CommandResponse::reply("1"));
        assert_eq!(second.response, CommandResponse::reply("2"));
        assert!(second.saved);
        assert_eq!(persister.recover("tally").await.unwrap(), json!({"hits": 2}));
    }

    #[tokio::test]
    async fn test_recover_failure_skips_body() {
        // Never started: every call is NotInitialized.
        let persister = Arc::new(MemoryPersister::new());
        let checkpoint = Checkpoint::new(persister, Arc::new(Brain::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let command = Command::builder("tally", Tally(calls.clone())).build();

        let err = run_once(&checkpoint, &command).await.unwrap_err();
        assert!(matches!(err, DispatchError::Persist(PersistError::NotInitialized)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_body_failure_discards_state() {
        let persister = started_memory().await;
        let checkpoint = Checkpoint::new(persister.clone(), Arc::new(Brain::new()));
        let command = Command::builder("explode", Explode).build();

        let err = run_once(&checkpoint, &command).await.unwrap_err();
        assert!(matches!(err, DispatchError::CommandBody { ref command, .. } if command == "explode"));
        assert_eq!(persister.recover("explode").await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_save_failure_keeps_reply() {
        let persister = Arc::new(FlakyPersister::failing_saves());
        persister.start().await.unwrap();
        let checkpoint = Checkpoint::new(persister.clone(), Arc::new(Brain::new()));
        let command = Command::builder("tally", Tally(Arc::new(AtomicUsize::new(0)))).build();

        let report = run_once(&checkpoint, &command).await.unwrap();
        assert_eq!(report.response, CommandResponse::reply("1"));
        assert!(!report.saved);
        assert_eq!(persister.save_attempts(), 1);
    }

    /// Reads `hits`, yields, then writes it back incremented.
    struct SlowTally;

    #[async_trait]
    impl CommandHandler for SlowTally {
        async fn handle(
            &self,
            _ctx: &CommandContext<'_>,
            state: &mut Value,
        ) -> anyhow::Result<CommandResponse> {
            let hits = state["hits"].as_u64().unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            state["hits"] = json!(hits + 1);
            Ok(CommandResponse::silent())
        }
    }

    #[tokio::test]
    async fn test_same_partition_runs_do_not_lose_updates() {
        let persister = started_memory().await;
        let checkpoint = Checkpoint::new(persister.clone(), Arc::new(Brain::new()));
        let command = Command::builder("tally", SlowTally).build();

        let (a, b) = tokio::join!(
            run_once(&checkpoint, &command),
            run_once(&checkpoint, &command)
        );
        assert!(a.unwrap().saved && b.unwrap().saved);
        assert_eq!(persister.recover("tally").await.unwrap(), json!({"hits": 2}));
    }
}
