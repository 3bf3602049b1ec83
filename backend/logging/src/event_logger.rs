//! Dispatch Event Logger
//!
//! One structured record per dispatch decision, emitted on the
//! `dispatch_events` target so it can be filtered into its own stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::redact::redact_sensitive_data;

/// Tracing target for dispatch events.
pub const DISPATCH_TARGET: &str = "dispatch_events";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    CommandInvoked {
        command: String,
        partition: String,
        text: String,
    },
    AccessDenied {
        command: String,
        roles: Vec<String>,
    },
    HandlerFired {
        matched: usize,
        failed: usize,
    },
    CheckpointFailed {
        command: String,
        partition: String,
        stage: String,
        error: String,
    },
}

impl DispatchEvent {
    fn redact(&mut self) {
        match self {
            DispatchEvent::CommandInvoked { text, .. } => {
                *text = redact_sensitive_data(text);
            }
            DispatchEvent::CheckpointFailed { error, .. } => {
                *error = redact_sensitive_data(error);
            }
            DispatchEvent::AccessDenied { .. } | DispatchEvent::HandlerFired { .. } => {}
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DispatchEventEntry {
    pub user: String,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    pub event: DispatchEvent,
}

pub struct DispatchEventLogger;

impl DispatchEventLogger {
    /// Redact and emit one event, returning the entry that was logged.
    pub fn log_event(user: &str, channel: &str, mut event: DispatchEvent) -> DispatchEventEntry {
        event.redact();

        let entry = DispatchEventEntry {
            user: user.into(),
            channel: channel.into(),
            timestamp: Utc::now(),
            event,
        };

        let json = serde_json::to_string(&entry).unwrap_or_default();
        info!(target: DISPATCH_TARGET, event = %json, "Dispatch event");
        entry
    }
}
