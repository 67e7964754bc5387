//! Everything you need to process the messages pulled from a queue.
//!
//! Implement [`Consumer`] (one job at a time) or [`BatchConsumer`] (many jobs at once), then
//! register it into [`Consumers`] for a message type and hand the map over to
//! [`Queue::consume`](crate::queue::Queue::consume).
//!
//! [`SingleConsumer`] and [`AccumulativeConsumer`] adapt consumers to the most common
//! acknowledgement strategies.
mod accumulative;
mod consumer;
mod consumer_map;
mod delivery;
mod job;
mod single;

pub use accumulative::AccumulativeConsumer;
pub use consumer::{BatchConsumer, BatchConsumerFn, Consumer, ConsumerFn};
pub use consumer_map::Consumers;
pub use delivery::{Acknowledger, Delivery, DeliveryError};
pub use job::Job;
pub use single::SingleConsumer;

/// Best-effort extraction of the message a panic was raised with.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "Box<dyn Any>"
    }
}
