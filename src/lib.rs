//! `carrot-gates` maps strongly-typed messages to RabbitMQ routing keys, dispatches incoming
//! messages to the right consumer and retries failed messages with an exponential backoff.
//! It is built on top of [`lapin`].
//!
//! [`MessageGateRegistry`](crate::gates::MessageGateRegistry) and [`Queue`](crate::queue::Queue)
//! are the best starting points to learn more about what `carrot-gates` provides and how
//! to leverage it.

pub mod consumers;
pub mod gates;
pub mod publishers;
pub mod queue;

pub mod amqp;
pub mod pool;
