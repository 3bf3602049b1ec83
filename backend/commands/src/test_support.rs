//! Shared test doubles.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use opbot_core::Transport;
use opbot_persist::{MemoryPersister, PersistError, Persister};
use serde_json::Value;

use crate::bot::BotHandle;
use crate::handlers::HandlerRegistry;
use crate::registry::CommandRegistry;

/// Transport that records every `(text, channel)` it is asked to send.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(text, _)| text).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_message(&self, text: &str, channel: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((text.to_string(), channel.to_string()));
        Ok(())
    }
}

/// Memory persister that can be told to fail, and remembers what it saved.
pub struct FlakyPersister {
    inner: MemoryPersister,
    fail_saves: bool,
    fail_recovers: bool,
    save_attempts: AtomicUsize,
    saves: Mutex<Vec<(String, Value)>>,
}

impl FlakyPersister {
    pub fn new() -> Self {
        Self {
            inner: MemoryPersister::new(),
            fail_saves: false,
            fail_recovers: false,
            save_attempts: AtomicUsize::new(0),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::new()
        }
    }

    pub fn failing_recovers() -> Self {
        Self {
            fail_recovers: true,
            ..Self::new()
        }
    }

    /// Successful saves as `(partition, state)`, in order.
    pub fn saves(&self) -> Vec<(String, Value)> {
        self.saves.lock().unwrap().clone()
    }

    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persister for FlakyPersister {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn start(&self) -> Result<(), PersistError> {
        self.inner.start().await
    }

    async fn save(&self, state: &Value, partition: &str) -> Result<(), PersistError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            return Err(PersistError::Backend("disk full".into()));
        }
        self.inner.save(state, partition).await?;
        self.saves
            .lock()
            .unwrap()
            .push((partition.to_string(), state.clone()));
        Ok(())
    }

    async fn recover(&self, partition: &str) -> Result<Value, PersistError> {
        if self.fail_recovers {
            return Err(PersistError::Backend("connection refused".into()));
        }
        self.inner.recover(partition).await
    }
}

/// Bot handle over an empty registry and a recording transport.
pub fn test_bot() -> (BotHandle, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let bot = BotHandle::new(
        "bot",
        transport.clone(),
        HandlerRegistry::new(),
        Arc::new(CommandRegistry::new()),
    );
    (bot, transport)
}
