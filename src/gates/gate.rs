use serde::{de::DeserializeOwned, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An application-level payload that can travel through a [`MessageGate`].
///
/// You never implement `Message` by hand: every type that can be serialized to and deserialized
/// from JSON (and can be shared across tasks) is a `Message`.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A decoded message whose concrete type is only known to the gate that produced it.
pub(crate) type AnyMessage = Box<dyn Any + Send + Sync>;

type Deserializer =
    Arc<dyn Fn(serde_json::Value) -> Result<AnyMessage, serde_json::Error> + Send + Sync>;

/// The type tag of a [`Message`].
///
/// Two tags are equal if and only if they were built from the same Rust type.
/// The type name is carried along for logs and error messages.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    /// The tag of message type `M`.
    pub fn of<M: 'static>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    /// The fully qualified name of the Rust type behind this tag.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageType").field(&self.name).finish()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The static association between one message type, the routing key it travels under and
/// the deserializer used to rebuild it from the wire.
///
/// Gates are created once at startup and collected in a
/// [`MessageGateRegistry`](super::MessageGateRegistry).
///
/// # Example
///
/// ```rust
/// use carrot_gates::gates::{MessageGate, MessageType};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct UserRegistered {
///     user_id: u64,
/// }
///
/// let gate = MessageGate::new::<UserRegistered>("user.registered");
/// assert_eq!(gate.routing_key(), "user.registered");
/// assert_eq!(gate.message_type(), MessageType::of::<UserRegistered>());
/// ```
#[derive(Clone)]
pub struct MessageGate {
    routing_key: String,
    message_type: MessageType,
    deserializer: Deserializer,
}

impl MessageGate {
    /// A gate for `M` that decodes message bodies using `M`'s `Deserialize` implementation.
    pub fn new<M: Message>(routing_key: impl Into<String>) -> Self {
        Self::with_deserializer::<M, _>(routing_key, serde_json::from_value)
    }

    /// A gate for `M` with a custom deserializer.
    ///
    /// Useful when the wire format of a message has drifted from its Rust representation
    /// (e.g. a field was renamed by a producer you do not control).
    pub fn with_deserializer<M, F>(routing_key: impl Into<String>, deserializer: F) -> Self
    where
        M: Message,
        F: Fn(serde_json::Value) -> Result<M, serde_json::Error> + Send + Sync + 'static,
    {
        Self {
            routing_key: routing_key.into(),
            message_type: MessageType::of::<M>(),
            deserializer: Arc::new(move |document| {
                deserializer(document).map(|message| Box::new(message) as AnyMessage)
            }),
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Parse a raw body and rebuild the message it carries.
    ///
    /// Both malformed JSON and a document that does not match the message schema are
    /// reported as a [`serde_json::Error`].
    pub(crate) fn decode(&self, body: &[u8]) -> Result<AnyMessage, serde_json::Error> {
        let document = serde_json::from_slice(body)?;
        (self.deserializer)(document)
    }
}

impl fmt::Debug for MessageGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageGate")
            .field("routing_key", &self.routing_key)
            .field("message_type", &self.message_type)
            .finish_non_exhaustive()
    }
}
