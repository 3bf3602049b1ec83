use std::sync::Arc;

use anyhow::Result;
use opbot_core::Transport;

use crate::handlers::HandlerRegistry;
use crate::registry::CommandRegistry;

/// Handle given to command bodies and handler actions.
///
/// Exposes the outbound transport, the handler lists (so a command can arm a
/// follow-up handler) and the read-only command registry.
#[derive(Clone)]
pub struct BotHandle {
    name: String,
    transport: Arc<dyn Transport>,
    handlers: HandlerRegistry,
    registry: Arc<CommandRegistry>,
}

impl BotHandle {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        handlers: HandlerRegistry,
        registry: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            handlers,
            registry,
        }
    }

    /// Address token the bot answers to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send_message(&self, text: &str, channel: &str) -> Result<()> {
        self.transport.send_message(text, channel).await
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }
}
