use crate::consumers::DeliveryError;
use crate::gates::GateError;
use crate::publishers::PublisherError;

/// Errors returned by [`Queue`](crate::queue::Queue) operations.
#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    /// No gate is registered for the routing key or the message type.
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("Failed to serialize the message")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to open a channel")]
    Channel(#[source] anyhow::Error),
    /// Exchanges, queues or bindings could not be declared.
    #[error("Failed to declare the RabbitMq topology")]
    Topology(#[source] anyhow::Error),
    #[error(transparent)]
    Publish(#[from] PublisherError),
    /// The original delivery could not be rejected after being republished on the delayed exchange.
    #[error("Failed to finalize the delivery")]
    Finalize(#[source] DeliveryError),
    /// The consumer stream could not be started or broke down.
    #[error("Failed to consume from the queue")]
    Consume(#[source] anyhow::Error),
}
