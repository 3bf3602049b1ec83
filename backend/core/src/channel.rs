use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::OpbotError;
use crate::message::{InboundMessage, OutboundMessage};
use crate::traits::Transport;

/// Default channel buffer size for inbound and outbound queues.
const DEFAULT_BUFFER_SIZE: usize = 256;

/// Queues connecting channel adapters to the dispatcher.
///
/// Adapters push `InboundMessage`s onto `inbound_tx`; the dispatcher consumes
/// them from the inbound receiver. Replies travel the other way through the
/// outbound queue and are delivered by whichever adapter owns the receiver.
pub struct MessageBus {
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub inbound_rx: Option<mpsc::Receiver<InboundMessage>>,

    pub outbound_tx: mpsc::Sender<OutboundMessage>,
    pub outbound_rx: Option<mpsc::Receiver<OutboundMessage>>,
}

impl MessageBus {
    /// Create a new bus with default buffer sizes.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new bus with a custom buffer size.
    pub fn with_buffer_size(buffer: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer);

        info!(buffer_size = buffer, "MessageBus initialized");

        Self {
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        }
    }

    /// Take the inbound receiver (can only be called once).
    pub fn take_inbound_rx(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        debug!("Inbound receiver taken");
        self.inbound_rx.take()
    }

    /// Take the outbound receiver (can only be called once).
    pub fn take_outbound_rx(&mut self) -> Option<mpsc::Receiver<OutboundMessage>> {
        debug!("Outbound receiver taken");
        self.outbound_rx.take()
    }

    /// A `Transport` that enqueues replies on this bus.
    pub fn transport(&self) -> BusTransport {
        BusTransport {
            tx: self.outbound_tx.clone(),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// `Transport` implementation backed by the outbound queue of a `MessageBus`.
#[derive(Clone)]
pub struct BusTransport {
    tx: mpsc::Sender<OutboundMessage>,
}

#[async_trait]
impl Transport for BusTransport {
    fn name(&self) -> &str {
        "bus"
    }

    async fn send_message(&self, text: &str, channel: &str) -> Result<()> {
        self.tx
            .send(OutboundMessage::new(text, channel))
            .await
            .map_err(|_| OpbotError::ChannelClosed("outbound".into()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_send_receive() {
        let mut bus = MessageBus::new();
        let mut rx = bus.take_inbound_rx().unwrap();

        let msg = InboundMessage::new("opbot twelve", "U1", "C1");
        let id = msg.id;
        bus.inbound_tx.send(msg).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, id);
    }

    #[tokio::test]
    async fn test_bus_take_rx_once() {
        let mut bus = MessageBus::new();
        assert!(bus.take_outbound_rx().is_some());
        assert!(bus.take_outbound_rx().is_none()); // second take is None
    }

    #[tokio::test]
    async fn test_transport_enqueues_outbound() {
        let mut bus = MessageBus::new();
        let mut rx = bus.take_outbound_rx().unwrap();
        let transport = bus.transport();

        transport.send_message("12", "C1").await.unwrap();
        let out = rx.recv().await.unwrap();
        assert_eq!(out, OutboundMessage::new("12", "C1"));
    }

    #[tokio::test]
    async fn test_transport_fails_when_receiver_dropped() {
        let mut bus = MessageBus::with_buffer_size(2);
        drop(bus.take_outbound_rx());
        let transport = bus.transport();
        let err = transport.send_message("12", "C1").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OpbotError>(),
            Some(OpbotError::ChannelClosed(queue)) if queue == "outbound"
        ));
    }
}
