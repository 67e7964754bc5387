use lapin::message::BasicReturnMessage;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

use crate::amqp::Channel;
use crate::publishers::MessageEnvelope;

/// Delivery mode: Non-persistent (1) or persistent (2).
const PERSISTENT: u8 = 2;

/// Publishes [`MessageEnvelope`]s on a [`Channel`], under a timeout.
///
/// Every published message is marked as persistent and gets a `message_id` and a `timestamp`
/// unless the caller already provided them.
///
/// # Fault tolerance
///
/// `Publisher` is as resilient as the channel it is built on: use a
/// [`ChannelPool`](crate::pool::ChannelPool) to recover from broken channels.
#[derive(Clone)]
pub struct Publisher {
    channel: Arc<dyn Channel>,
    /// Timeout on publishing.
    timeout: std::time::Duration,
}

impl Publisher {
    pub fn new(channel: Arc<dyn Channel>, timeout: std::time::Duration) -> Self {
        Self { channel, timeout }
    }

    /// Publish a message to RabbitMq.
    #[tracing::instrument(
        level = "debug",
        name = "publish",
        skip_all,
        fields(exchange = %envelope.exchange_name, routing_key = %envelope.routing_key)
    )]
    pub async fn publish(&self, envelope: MessageEnvelope) -> Result<(), PublisherError> {
        let envelope = inject_amqp_properties(envelope);
        match tokio::time::timeout(self.timeout, self.channel.publish(&envelope)).await {
            Ok(result) => result,
            Err(_) => Err(PublisherError::TimeoutError),
        }
    }
}

/// Error returned when trying to publish a message.
#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    GenericError(#[source] anyhow::Error),
    #[error("The timeout threshold was reached while trying to publish the message")]
    TimeoutError,
    #[error("The message could not be routed: {0:?}")]
    UnroutableMessage(Box<BasicReturnMessage>),
    #[error("The RabbitMq broker nacked the publishing of the message: {0:?}")]
    NegativeAck(Option<Box<BasicReturnMessage>>),
}

fn inject_amqp_properties(mut envelope: MessageEnvelope) -> MessageEnvelope {
    let current_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|ct| ct.as_secs());

    let props = envelope.properties.with_delivery_mode(PERSISTENT);
    let props = if let Some(ct) = current_timestamp {
        let ts = *props.timestamp();
        props.with_timestamp(ts.unwrap_or(ct))
    } else {
        warn!("System time is before 1970");
        props
    };

    let message_id = props.message_id().clone();
    envelope.properties =
        props.with_message_id(message_id.unwrap_or_else(|| Uuid::new_v4().to_string().into()));

    envelope
}
