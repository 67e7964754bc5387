use amq_protocol_types::{FieldTable, ShortString};

use crate::amqp::BasicProperties;

/// A message ready to be handed over to a [`Channel`](crate::amqp::Channel) for publishing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageEnvelope {
    // The body of the message - as a sequence of bytes.
    pub payload: Vec<u8>,
    // The name of the exchange we are publishing the message to.
    pub exchange_name: String,
    // The routing key used by exchange listeners to determine if they are interested or not
    // to the message.
    pub routing_key: String,
    // AMQP properties (headers included) attached to the message.
    pub properties: BasicProperties,
}

impl MessageEnvelope {
    pub fn new(
        exchange_name: impl Into<String>,
        routing_key: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            payload,
            exchange_name: exchange_name.into(),
            routing_key: routing_key.into(),
            properties: BasicProperties::default(),
        }
    }

    fn props(mut self, f: impl FnOnce(BasicProperties) -> BasicProperties) -> Self {
        self.properties = f(self.properties);
        self
    }

    pub fn with_content_type(self, value: ShortString) -> Self {
        self.props(|p| p.with_content_type(value))
    }

    pub fn with_headers(self, value: FieldTable) -> Self {
        self.props(|p| p.with_headers(value))
    }

    /// Whether the message is persistent: `2` means persistent, `1` transient.
    pub fn is_persistent(&self) -> bool {
        *self.properties.delivery_mode() == Some(2)
    }
}
