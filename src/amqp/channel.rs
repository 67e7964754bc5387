use amq_protocol_types::FieldTable;
use futures_util::stream::{BoxStream, StreamExt};
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeBindOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
};
use uuid::Uuid;

use crate::amqp::topology::ExchangeDeclaration;
use crate::consumers::Delivery;
use crate::publishers::{MessageEnvelope, PublisherError};

/// An unbounded stream of deliveries pulled from a queue.
///
/// It ends (or yields an error) when the underlying channel is closed and it cannot be restarted.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, anyhow::Error>>;

/// The broker primitives a [`Queue`](crate::queue::Queue) is built upon.
///
/// `Channel` is implemented for [`lapin::Channel`] and for the pooled
/// [`ChannelPool`](crate::pool::ChannelPool).
/// Implement it yourself to run a `Queue` on top of something else (e.g. an in-memory broker
/// in your test suite).
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Declare a durable exchange. Declaring an existing exchange with the same settings is a no-op.
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), anyhow::Error>;

    /// Declare a durable queue.
    async fn declare_queue(&self, queue_name: &str) -> Result<(), anyhow::Error>;

    /// Route messages published on `exchange_name` with `routing_key` to `queue_name`.
    async fn bind_queue(
        &self,
        queue_name: &str,
        exchange_name: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error>;

    /// Route messages published on the `source` exchange to the `destination` exchange.
    async fn bind_exchange(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error>;

    /// Cap the number of unacknowledged deliveries pushed to consumers on this channel.
    async fn set_qos(&self, prefetch_count: u16) -> Result<(), anyhow::Error>;

    async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), PublisherError>;

    /// Start pulling deliveries from `queue_name`.
    async fn consume(&self, queue_name: &str) -> Result<DeliveryStream, anyhow::Error>;
}

#[async_trait::async_trait]
impl Channel for lapin::Channel {
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), anyhow::Error> {
        self.exchange_declare(
            &exchange.name,
            exchange.kind.clone(),
            ExchangeDeclareOptions {
                passive: false,
                durable: true,
                auto_delete: false,
                internal: false,
                nowait: false,
            },
            exchange.arguments.clone(),
        )
        .await?;
        Ok(())
    }

    async fn declare_queue(&self, queue_name: &str) -> Result<(), anyhow::Error> {
        self.queue_declare(
            queue_name,
            QueueDeclareOptions {
                passive: false,
                durable: true,
                exclusive: false,
                auto_delete: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue_name: &str,
        exchange_name: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error> {
        self.queue_bind(
            queue_name,
            exchange_name,
            routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }

    async fn bind_exchange(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error> {
        self.exchange_bind(
            destination,
            source,
            routing_key,
            ExchangeBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }

    async fn set_qos(&self, prefetch_count: u16) -> Result<(), anyhow::Error> {
        self.basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await?;
        Ok(())
    }

    /// Publish a payload on a RabbitMq exchange, waiting for publisher confirmation from the
    /// RabbitMq broker if the channel has confirmations enabled.
    async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), PublisherError> {
        let options = BasicPublishOptions {
            mandatory: false,
            // The immediate flag was dropped in RabbitMQ 3.0 - see https://www.rabbitmq.com/blog/2012/11/19/breaking-things-with-rabbitmq-3-0/
            // Setting `true` will cause a not-supported error
            immediate: false,
        };
        let confirm = self
            .basic_publish(
                &envelope.exchange_name,
                &envelope.routing_key,
                options,
                &envelope.payload,
                envelope.properties.clone(),
            )
            .await
            .map_err(|e| PublisherError::GenericError(e.into()))?
            .await
            .map_err(|e| PublisherError::GenericError(e.into()))?;

        match confirm {
            Confirmation::Ack(ack) => {
                if let Some(return_message) = ack {
                    // Reply Code 312 - NO_ROUTE
                    // See https://www.rabbitmq.com/amqp-0-9-1-reference.html
                    if return_message.reply_code == 312 {
                        return Err(PublisherError::UnroutableMessage(return_message));
                    }
                }
                Ok(())
            }
            Confirmation::Nack(nack) => Err(PublisherError::NegativeAck(nack)),
            Confirmation::NotRequested => Ok(()),
        }
    }

    async fn consume(&self, queue_name: &str) -> Result<DeliveryStream, anyhow::Error> {
        let consumer = self
            .basic_consume(
                queue_name,
                &Uuid::new_v4().to_string(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer
            .map(|delivery| delivery.map(Delivery::from).map_err(anyhow::Error::from))
            .boxed())
    }
}
