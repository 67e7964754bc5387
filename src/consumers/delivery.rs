use amq_protocol_types::{DeliveryTag, ShortString};
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions},
    BasicProperties,
};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::amqp::convenience::BasicPropertiesExt;
use crate::queue::X_ATTEMPTS;

/// How many bytes of a body end up in log records.
const BODY_PREVIEW_LENGTH: usize = 512;

/// The terminal operations of a delivery, as offered by the broker.
///
/// Each method is invoked at most once per delivery: [`Delivery`] guards against repeated
/// finalization before reaching the acknowledger.
#[async_trait::async_trait]
pub trait Acknowledger: Send + Sync + 'static {
    /// The delivery was processed successfully.
    async fn ack(&self) -> Result<(), anyhow::Error>;
    /// The delivery could not be processed. The broker must not requeue it.
    async fn nack(&self) -> Result<(), anyhow::Error>;
    /// The delivery is refused. The broker must not requeue it.
    async fn reject(&self) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl Acknowledger for Acker {
    async fn ack(&self) -> Result<(), anyhow::Error> {
        Acker::ack(self, BasicAckOptions { multiple: false }).await?;
        Ok(())
    }

    async fn nack(&self) -> Result<(), anyhow::Error> {
        Acker::nack(
            self,
            BasicNackOptions {
                multiple: false,
                requeue: false,
            },
        )
        .await?;
        Ok(())
    }

    async fn reject(&self) -> Result<(), anyhow::Error> {
        Acker::reject(self, BasicRejectOptions { requeue: false }).await?;
        Ok(())
    }
}

/// Failure to finalize a [`Delivery`].
#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    /// The delivery was already acked, nacked or rejected.
    ///
    /// Several code paths may race to finalize the same delivery when processing fails:
    /// this error is benign and usually swallowed.
    #[error("The delivery was already acked, nacked or rejected")]
    AlreadyFinalized,
    /// The broker could not be reached to finalize the delivery.
    #[error("Failed to finalize the delivery with the broker")]
    Broker(#[source] anyhow::Error),
}

/// A message received from RabbitMq, waiting for exactly one terminal outcome
/// (ack, nack or reject).
pub struct Delivery {
    /// The delivery tag of the message.
    pub delivery_tag: DeliveryTag,

    /// The exchange of the message. May be an empty string
    /// if the default exchange is used.
    pub exchange: ShortString,

    /// The routing key of the message. May be an empty string
    /// if no routing key is specified.
    pub routing_key: ShortString,

    /// Whether this message was redelivered
    pub redelivered: bool,

    /// Contains the properties and the headers of the
    /// message.
    pub properties: BasicProperties,

    /// The payload of the message in binary format.
    pub data: Vec<u8>,

    // AMQP forbids acking/rejecting a delivery more than once:
    // https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.ack.delivery-tag
    acker: Box<dyn Acknowledger>,
    processed: AtomicBool,
}

impl Delivery {
    /// Build a delivery from its parts.
    ///
    /// Deliveries pulled from RabbitMq are converted from [`lapin::message::Delivery`] instead.
    pub fn new(
        routing_key: impl Into<ShortString>,
        data: Vec<u8>,
        properties: BasicProperties,
        acker: impl Acknowledger,
    ) -> Self {
        Self {
            delivery_tag: 0,
            exchange: ShortString::from(""),
            routing_key: routing_key.into(),
            redelivered: false,
            properties,
            data,
            acker: Box::new(acker),
            processed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_delivery_tag(mut self, delivery_tag: DeliveryTag) -> Self {
        self.delivery_tag = delivery_tag;
        self
    }

    /// `true` once the delivery has been acked, nacked or rejected.
    pub fn is_processed(&self) -> bool {
        self.processed.load(Ordering::SeqCst)
    }

    /// How many times this message has been attempted, according to its `x-attempts` header.
    ///
    /// Defaults to 1 when the header is missing.
    pub fn attempts(&self) -> i64 {
        self.properties.get_header_i64(X_ATTEMPTS).unwrap_or(1)
    }

    /// The beginning of the body, for log records.
    pub fn body_preview(&self) -> Cow<'_, str> {
        let end = self.data.len().min(BODY_PREVIEW_LENGTH);
        String::from_utf8_lossy(&self.data[..end])
    }

    /// Acknowledge the delivery.
    ///
    /// The delivery counts as processed even if the broker call fails: it will not be acked,
    /// nacked, rejected or requeued again, and the broker redelivers it once the channel closes.
    pub async fn ack(&self) -> Result<(), DeliveryError> {
        self.mark_processed()?;
        let outcome = self.acker.ack().await;
        self.broker_outcome("ack", outcome)
    }

    pub async fn nack(&self) -> Result<(), DeliveryError> {
        self.mark_processed()?;
        let outcome = self.acker.nack().await;
        self.broker_outcome("nack", outcome)
    }

    pub async fn reject(&self) -> Result<(), DeliveryError> {
        self.mark_processed()?;
        let outcome = self.acker.reject().await;
        self.broker_outcome("reject", outcome)
    }

    fn broker_outcome(
        &self,
        operation: &'static str,
        outcome: Result<(), anyhow::Error>,
    ) -> Result<(), DeliveryError> {
        outcome.map_err(|e| {
            tracing::warn!(
                error = ?e,
                operation,
                delivery_tag = self.delivery_tag,
                routing_key = %self.routing_key.as_str(),
                "The broker refused to finalize a delivery, it stays pending until the channel closes"
            );
            DeliveryError::Broker(e)
        })
    }

    fn mark_processed(&self) -> Result<(), DeliveryError> {
        if self.processed.swap(true, Ordering::SeqCst) {
            Err(DeliveryError::AlreadyFinalized)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("processed", &self.is_processed())
            .finish_non_exhaustive()
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            exchange: value.exchange,
            routing_key: value.routing_key,
            redelivered: value.redelivered,
            properties: value.properties,
            data: value.data,
            acker: Box::new(value.acker),
            processed: AtomicBool::new(false),
        }
    }
}
