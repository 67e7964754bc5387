use crate::gates::{GateError, Message, MessageGate, MessageType};

/// The ordered collection of every [`MessageGate`] known to a service.
///
/// The registry answers two questions:
/// - which message type travels under an inbound routing key (consuming side);
/// - which routing key an outbound message type must be published to (producing side).
///
/// Routing keys and message types are both unique within a registry - it is checked once,
/// in [`MessageGateRegistry::new`].
#[derive(Clone, Debug, Default)]
pub struct MessageGateRegistry {
    gates: Vec<MessageGate>,
}

impl MessageGateRegistry {
    /// Build a registry, failing if two gates share a routing key or a message type.
    pub fn new(gates: impl IntoIterator<Item = MessageGate>) -> Result<Self, GateError> {
        let mut registry = Self { gates: Vec::new() };
        for gate in gates {
            if registry.get_by_routing_key(gate.routing_key()).is_ok() {
                return Err(GateError::DuplicateRoutingKey(gate.routing_key().to_owned()));
            }
            if registry.get_by_message_type(gate.message_type()).is_ok() {
                return Err(GateError::DuplicateMessageType(gate.message_type()));
            }
            registry.gates.push(gate);
        }
        Ok(registry)
    }

    pub fn get_by_routing_key(&self, routing_key: &str) -> Result<&MessageGate, GateError> {
        self.gates
            .iter()
            .find(|gate| gate.routing_key() == routing_key)
            .ok_or_else(|| GateError::UnknownRoutingKey(routing_key.to_owned()))
    }

    pub fn get_by_message_type(&self, message_type: MessageType) -> Result<&MessageGate, GateError> {
        self.gates
            .iter()
            .find(|gate| gate.message_type() == message_type)
            .ok_or(GateError::UnknownMessageType(message_type))
    }

    /// Shorthand for `get_by_message_type(MessageType::of::<M>())`.
    pub fn gate_for<M: Message>(&self) -> Result<&MessageGate, GateError> {
        self.get_by_message_type(MessageType::of::<M>())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageGate> {
        self.gates.iter()
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
