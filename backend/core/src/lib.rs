pub mod channel;
pub mod error;
pub mod message;
pub mod traits;

pub use channel::{BusTransport, MessageBus};
pub use error::OpbotError;
pub use message::{InboundMessage, OutboundMessage};
pub use traits::{NoRoles, RoleResolver, Transport};
