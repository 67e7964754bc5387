//! Helpers for connecting to a rabbitmq broker and the [`Channel`] abstraction the rest of the
//! crate is built upon.

mod channel;
pub mod configuration;
pub mod convenience;
mod factory;
pub mod topology;

pub use channel::{Channel, DeliveryStream};
pub use factory::ConnectionFactory;

pub use lapin::{options, types, BasicProperties};
