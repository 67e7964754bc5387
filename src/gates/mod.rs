//! Message gates map strongly-typed application messages to RabbitMq routing keys and back.
//!
//! Check out [`MessageGate`] and [`MessageGateRegistry`] as a starting point.
mod gate;
mod registry;

pub(crate) use gate::AnyMessage;
pub use gate::{Message, MessageGate, MessageType};
pub use registry::MessageGateRegistry;

/// Errors returned when building or querying a [`MessageGateRegistry`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// No gate is registered for the routing key.
    #[error("Invalid message routing key: [{0}]")]
    UnknownRoutingKey(String),
    /// No gate (or no consumer) is registered for the message type.
    #[error("Invalid message type: [{0}]")]
    UnknownMessageType(MessageType),
    #[error("The routing key [{0}] is used by more than one message gate")]
    DuplicateRoutingKey(String),
    #[error("The message type [{0}] is used by more than one message gate")]
    DuplicateMessageType(MessageType),
}
