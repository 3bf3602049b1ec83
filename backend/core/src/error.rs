use thiserror::Error;

/// Top-level error type for the opbot runtime plumbing.
#[derive(Debug, Error)]
pub enum OpbotError {
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}
