use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat message delivered to the bot by a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub text: String,
    pub user: String,
    pub channel: String,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        text: impl Into<String>,
        user: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            user: user.into(),
            channel: channel.into(),
            received_at: Utc::now(),
        }
    }
}

/// A reply the bot wants delivered to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    pub channel: String,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            channel: channel.into(),
        }
    }
}
