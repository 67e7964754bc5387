//! The exchanges a [`Queue`](crate::queue::Queue) relies on.
//!
//! ```text
//!                      routing key                  ┌────────────┐
//!   produce ─────────► <exchange> (topic) ─────────►│ your queue │
//!                            ▲                       └────────────┘
//!                            │ bound with ""
//!   requeue ─► <exchange>_delayed (x-delayed-message, fanout)
//!              holds each message for `x-delay` milliseconds
//! ```
//!
//! The delayed exchange requires the
//! [delayed message exchange plugin](https://github.com/rabbitmq/rabbitmq-delayed-message-exchange).
use amq_protocol_types::{AMQPValue, FieldTable, LongString};
pub use lapin::ExchangeKind;

/// The argument telling the delayed exchange how to route messages once their delay expires.
pub const X_DELAYED_TYPE: &str = "x-delayed-type";

/// A durable exchange to be declared against the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct ExchangeDeclaration {
    pub name: String,
    pub kind: ExchangeKind,
    pub arguments: FieldTable,
}

impl ExchangeDeclaration {
    /// A durable topic exchange, used for normal routing.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
            arguments: FieldTable::default(),
        }
    }

    /// The durable delayed-delivery exchange paired with `exchange`, used exclusively to
    /// republish failed messages with a backoff.
    pub fn delayed(exchange: &str) -> Self {
        let mut arguments = FieldTable::default();
        arguments.insert(
            X_DELAYED_TYPE.into(),
            AMQPValue::LongString(LongString::from("fanout")),
        );
        Self {
            name: delayed_exchange_name(exchange),
            kind: ExchangeKind::Custom("x-delayed-message".to_owned()),
            arguments,
        }
    }
}

/// The name of the delayed exchange paired with `exchange`.
pub fn delayed_exchange_name(exchange: &str) -> String {
    format!("{exchange}_delayed")
}
