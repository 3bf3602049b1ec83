//! Wires a prepared config into a running dispatcher.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use opbot_channels::{deliver_outbound, ChannelAdapter, ConsoleAdapter, SlackAdapter, SlackSettings};
use opbot_commands::{
    builtin_commands, CommandRegistry, Dispatcher, DispatcherSettings, Replies, DEFAULT_ASK_LIFESPAN,
};
use opbot_config::{defaults, OpbotConfig, PersisterKind};
use opbot_core::{MessageBus, Transport};
use opbot_persist::{FilePersister, MemoryPersister, Persister, SqlitePersister};
use opbot_security::PermissionTable;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Time allowed for queued replies to go out after console input ends.
const CONSOLE_DRAIN_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

/// Construct and start the configured persister.
pub async fn build_persister(config: &OpbotConfig) -> Result<Arc<dyn Persister>> {
    let kind = config.persister_kind();
    let persister: Arc<dyn Persister> = match kind {
        PersisterKind::Memory => Arc::new(MemoryPersister::new()),
        PersisterKind::File => Arc::new(FilePersister::new(
            config.persister_path().unwrap_or(defaults::DEFAULT_DATA_DIR),
        )),
        PersisterKind::Sqlite => Arc::new(SqlitePersister::open(
            config.persister_path().unwrap_or(defaults::DEFAULT_SQLITE_PATH),
        )),
    };
    persister
        .start()
        .await
        .with_context(|| format!("Failed to start {kind} persister"))?;
    info!(persister = persister.name(), "Persister started");
    Ok(persister)
}

pub fn permissions(config: &OpbotConfig) -> PermissionTable {
    PermissionTable::from_map(config.permissions.clone().unwrap_or_default())
}

pub fn ask_lifespan(config: &OpbotConfig) -> Duration {
    config
        .bot
        .as_ref()
        .and_then(|b| b.ask_timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_ASK_LIFESPAN)
}

pub fn dispatcher_settings(config: &OpbotConfig) -> DispatcherSettings {
    let mut replies = Replies::default();
    if let Some(messages) = &config.messages {
        if let Some(text) = &messages.access_denied {
            replies.access_denied = text.clone();
        }
        if let Some(text) = &messages.no_suggestion {
            replies.no_suggestion = text.clone();
        }
        if let Some(text) = &messages.command_error {
            replies.command_error = text.clone();
        }
    }

    config
        .bot_aliases()
        .iter()
        .fold(DispatcherSettings::new(config.bot_name()), |settings, alias| {
            settings.alias(alias.as_str())
        })
        .replies(replies)
}

/// Build a dispatcher whose replies go to `transport`.
pub async fn build_dispatcher(
    config: &OpbotConfig,
    transport: Arc<dyn Transport>,
) -> Result<Dispatcher> {
    let persister = build_persister(config).await?;
    let permissions = permissions(config);
    let registry =
        CommandRegistry::from_commands(builtin_commands(permissions.clone(), ask_lifespan(config)));
    info!(commands = registry.commands().len(), "Command registry built");

    Ok(
        Dispatcher::new(dispatcher_settings(config), registry, transport, persister)
            .with_resolver(Arc::new(permissions)),
    )
}

// ---------------------------------------------------------------------------
// Run modes
// ---------------------------------------------------------------------------

/// Serve the Slack Events API webhook until interrupted.
pub async fn serve(config: &OpbotConfig) -> Result<()> {
    let Some(slack) = &config.slack else {
        bail!("`serve` needs a `slack` section in the config");
    };
    let settings = SlackSettings {
        bot_token: slack.bot_token.clone().context("slack.botToken is required")?,
        signing_secret: slack
            .signing_secret
            .clone()
            .context("slack.signingSecret is required")?,
        webhook_path: slack
            .webhook_path
            .clone()
            .unwrap_or_else(|| defaults::DEFAULT_SLACK_WEBHOOK_PATH.to_string()),
    };
    let bind = slack.bind.as_deref().unwrap_or(defaults::DEFAULT_SLACK_BIND);

    let mut bus = MessageBus::new();
    let adapter = Arc::new(SlackAdapter::new(settings, bus.inbound_tx.clone()));
    let dispatcher = Arc::new(build_dispatcher(config, Arc::new(bus.transport())).await?);

    let inbound_rx = bus.take_inbound_rx().context("inbound receiver already taken")?;
    let outbound_rx = bus.take_outbound_rx().context("outbound receiver already taken")?;
    tokio::spawn(Arc::clone(&dispatcher).run(inbound_rx));
    tokio::spawn(deliver_outbound(outbound_rx, adapter.clone()));
    adapter.start(bus.inbound_tx.clone()).await?;

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(addr = %bind, path = %adapter.webhook_path(), bot = %config.bot_name(), "Slack webhook listening");

    axum::serve(listener, adapter.build_router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Read commands from stdin and print replies to stdout until end of input.
pub async fn console(config: &OpbotConfig) -> Result<()> {
    let console = config.console.clone().unwrap_or_default();
    let user = console
        .user
        .unwrap_or_else(|| defaults::DEFAULT_CONSOLE_USER.to_string());
    let channel = console
        .channel
        .unwrap_or_else(|| defaults::DEFAULT_CONSOLE_CHANNEL.to_string());

    let mut bus = MessageBus::new();
    let adapter = Arc::new(ConsoleAdapter::stdio(user, channel));
    let dispatcher = Arc::new(build_dispatcher(config, Arc::new(bus.transport())).await?);

    let inbound_rx = bus.take_inbound_rx().context("inbound receiver already taken")?;
    let outbound_rx = bus.take_outbound_rx().context("outbound receiver already taken")?;
    let dispatching = tokio::spawn(Arc::clone(&dispatcher).run(inbound_rx));
    let delivery = tokio::spawn(deliver_outbound(outbound_rx, adapter.clone()));

    tokio::select! {
        result = adapter.start(bus.inbound_tx.clone()) => result?,
        _ = shutdown_signal() => {}
    }

    // Closing the inbound queue lets the dispatcher finish what it has.
    drop(bus);
    if let Err(e) = dispatching.await {
        error!(error = %e, "Dispatcher task failed");
    }
    // Armed handlers can keep a transport alive, so delivery gets a deadline.
    drop(dispatcher);
    if tokio::time::timeout(CONSOLE_DRAIN_GRACE, delivery).await.is_err() {
        warn!("Outbound delivery still busy at exit");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
