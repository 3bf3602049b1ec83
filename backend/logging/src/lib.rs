//! Structured logging for opbot.
//!
//! Subscriber setup (console plus daily-rolling NDJSON file), redaction of
//! secrets in logged text, and the dispatch event logger.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{DispatchEvent, DispatchEventEntry, DispatchEventLogger};
pub use logger::{init_logger, LOG_FILE_PREFIX};
pub use redact::redact_sensitive_data;
