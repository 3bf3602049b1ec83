use std::sync::Arc;

use async_trait::async_trait;
use opbot_core::{InboundMessage, OutboundMessage, Transport};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub mod console;
pub mod slack;

pub use console::ConsoleAdapter;
pub use slack::{SlackAdapter, SlackSettings};

/// All channel adapters implement this trait.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Human-readable adapter name for logging.
    fn name(&self) -> &str;

    /// Axum sub-router for inbound webhook endpoints. Adapters that read
    /// from a stream return an empty router.
    fn build_router(&self) -> axum::Router {
        axum::Router::new()
    }

    /// Run the adapter's inbound side, pushing messages onto `inbound_tx`.
    async fn start(&self, inbound_tx: mpsc::Sender<InboundMessage>) -> anyhow::Result<()>;
}

/// Drain the outbound queue into `transport` until every sender is gone.
/// Failed sends are logged and dropped.
pub async fn deliver_outbound(
    mut rx: mpsc::Receiver<OutboundMessage>,
    transport: Arc<dyn Transport>,
) {
    info!(transport = transport.name(), "Outbound delivery started");
    while let Some(message) = rx.recv().await {
        if let Err(e) = transport.send_message(&message.text, &message.channel).await {
            warn!(
                transport = transport.name(),
                channel = %message.channel,
                error = %e,
                "Failed to deliver message"
            );
        }
    }
    info!(transport = transport.name(), "Outbound delivery stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Sink {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Sink {
        fn name(&self) -> &str {
            "sink"
        }

        async fn send_message(&self, text: &str, channel: &str) -> Result<()> {
            if channel == "closed" {
                anyhow::bail!("channel archived");
            }
            self.sent.lock().unwrap().push(format!("{channel}:{text}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivers_until_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let sink = Arc::new(Sink::default());
        let task = tokio::spawn(deliver_outbound(rx, sink.clone()));

        tx.send(OutboundMessage::new("12", "C1")).await.unwrap();
        tx.send(OutboundMessage::new("lost", "closed")).await.unwrap();
        tx.send(OutboundMessage::new("13", "C2")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(*sink.sent.lock().unwrap(), vec!["C1:12", "C2:13"]);
    }
}
