use lapin::options::ConfirmSelectOptions;
use std::sync::Arc;
use std::time::Duration;

use crate::amqp::configuration::QueueSettings;
use crate::amqp::Channel;
use crate::gates::MessageGateRegistry;
use crate::queue::{Queue, QueueError};

const DEFAULT_PREFETCH_COUNT: u16 = 5;
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

/// Builds a [`Queue`]. Get one from [`Queue::builder`] or [`QueueBuilder::from_settings`].
///
/// A queue relies on three channels: one to consume, one to produce and one to republish failed
/// messages on the delayed exchange.
#[derive(Debug)]
pub struct QueueBuilder {
    exchange: String,
    gates: MessageGateRegistry,
    prefetch_count: u16,
    publish_timeout: Duration,
}

impl QueueBuilder {
    pub fn new(exchange: impl Into<String>, gates: MessageGateRegistry) -> Self {
        Self {
            exchange: exchange.into(),
            gates,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn from_settings(settings: &QueueSettings, gates: MessageGateRegistry) -> Self {
        Self::new(settings.exchange.clone(), gates)
            .prefetch_count(settings.prefetch_count)
            .publish_timeout(settings.publish_timeout())
    }

    /// How many unacknowledged deliveries RabbitMq pushes to the consumer at once.
    /// Defaults to 5.
    #[must_use]
    pub fn prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// How long publishing may take before giving up. Defaults to 3 seconds.
    #[must_use]
    pub fn publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    /// Open the channels of the queue on `connection`.
    ///
    /// Publisher confirms are enabled on the produce and delay channels.
    #[tracing::instrument(name = "queue_connect", skip_all, fields(exchange = %self.exchange))]
    pub async fn connect(self, connection: &lapin::Connection) -> Result<Queue, QueueError> {
        let consume_channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Channel(e.into()))?;
        let produce_channel = open_confirmed_channel(connection).await?;
        let delay_channel = open_confirmed_channel(connection).await?;
        self.with_channels(consume_channel, produce_channel, delay_channel)
            .await
    }

    /// Build the queue on top of channels you opened yourself.
    pub async fn with_channels<C, P, D>(
        self,
        consume_channel: C,
        produce_channel: P,
        delay_channel: D,
    ) -> Result<Queue, QueueError>
    where
        C: Channel,
        P: Channel,
        D: Channel,
    {
        consume_channel
            .set_qos(self.prefetch_count)
            .await
            .map_err(QueueError::Channel)?;
        Ok(Queue::from_parts(
            self.exchange,
            self.gates,
            Arc::new(consume_channel),
            Arc::new(produce_channel),
            Arc::new(delay_channel),
            self.publish_timeout,
        ))
    }
}

async fn open_confirmed_channel(
    connection: &lapin::Connection,
) -> Result<lapin::Channel, QueueError> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| QueueError::Channel(e.into()))?;
    channel
        .confirm_select(ConfirmSelectOptions { nowait: false })
        .await
        .map_err(|e| QueueError::Channel(e.into()))?;
    Ok(channel)
}
