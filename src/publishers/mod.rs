//! Facilities to publish messages to a RabbitMq exchange.
//!
//! Applications publish through [`Queue::produce`](crate::queue::Queue::produce);
//! [`Publisher`] is the building block it relies on.
mod message_envelope;
mod publisher;

pub use message_envelope::MessageEnvelope;
pub use publisher::{Publisher, PublisherError};
