use amq_protocol_types::{AMQPValue, FieldTable};
use futures_util::{stream::FuturesUnordered, FutureExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::amqp::topology::{delayed_exchange_name, ExchangeDeclaration};
use crate::amqp::Channel;
use crate::consumers::{Consumers, Delivery, DeliveryError};
use crate::gates::{GateError, Message, MessageGateRegistry, MessageType};
use crate::publishers::{MessageEnvelope, Publisher};
use crate::queue::backoff::{calculate_requeue_backoff, X_ATTEMPTS, X_DELAY};
use crate::queue::{QueueBuilder, QueueError};

const APPLICATION_JSON: &str = "application/json";

/// Produces and consumes typed messages on a RabbitMq exchange, retrying failed messages with an
/// exponential backoff.
///
/// Every message type is routed with the routing key of its [`MessageGate`](crate::gates::MessageGate).
/// Failed messages are republished on the delayed exchange (`<exchange>_delayed`), which
/// routes them back to the main exchange once their delay expires.
///
/// `Queue` is a cheap handle: clones share the same channels.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    exchange: String,
    gates: MessageGateRegistry,
    consume_channel: Arc<dyn Channel>,
    produce_channel: Arc<dyn Channel>,
    delay_channel: Arc<dyn Channel>,
    producer: Publisher,
    delayer: Publisher,
    produce_topology: OnceCell<()>,
    delay_topology: OnceCell<()>,
}

impl Queue {
    pub fn builder(exchange: impl Into<String>, gates: MessageGateRegistry) -> QueueBuilder {
        QueueBuilder::new(exchange, gates)
    }

    pub(crate) fn from_parts(
        exchange: String,
        gates: MessageGateRegistry,
        consume_channel: Arc<dyn Channel>,
        produce_channel: Arc<dyn Channel>,
        delay_channel: Arc<dyn Channel>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                exchange,
                gates,
                producer: Publisher::new(Arc::clone(&produce_channel), publish_timeout),
                delayer: Publisher::new(Arc::clone(&delay_channel), publish_timeout),
                consume_channel,
                produce_channel,
                delay_channel,
                produce_topology: OnceCell::new(),
                delay_topology: OnceCell::new(),
            }),
        }
    }

    /// The name of the main exchange.
    pub fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    pub fn gates(&self) -> &MessageGateRegistry {
        &self.inner.gates
    }

    /// Bind `queue_name` to the routing keys of the message types `consumers` handle, then
    /// dispatch every delivery to its consumer.
    ///
    /// `consume` returns when the delivery stream ends (e.g. the channel is closed), after
    /// waiting for the deliveries in flight to be processed.
    pub async fn consume(&self, queue_name: &str, consumers: Consumers) -> Result<(), QueueError> {
        self.consume_until(queue_name, consumers, std::future::pending::<()>())
            .await
    }

    /// Same as [`Queue::consume`], but stops pulling deliveries as soon as `shutdown` completes.
    #[tracing::instrument(name = "queue_consume", skip_all, fields(queue_name = %queue_name))]
    pub async fn consume_until(
        &self,
        queue_name: &str,
        consumers: Consumers,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), QueueError> {
        let channel = &self.inner.consume_channel;
        channel
            .declare_exchange(&ExchangeDeclaration::topic(&self.inner.exchange))
            .await
            .map_err(QueueError::Topology)?;
        channel
            .declare_queue(queue_name)
            .await
            .map_err(QueueError::Topology)?;
        for message_type in consumers.message_types() {
            let gate = self.inner.gates.get_by_message_type(message_type)?;
            channel
                .bind_queue(queue_name, &self.inner.exchange, gate.routing_key())
                .await
                .map_err(QueueError::Topology)?;
        }

        let mut deliveries = channel
            .consume(queue_name)
            .await
            .map_err(QueueError::Consume)?;
        let consumers = Arc::new(consumers);
        let mut task_handles = FuturesUnordered::new();

        let shutdown = shutdown.fuse();
        tokio::pin!(shutdown);

        let result = 'event_loop: loop {
            tokio::select! {
                // shutdowns are handled before pulling more deliveries
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Queue consumer received a shutdown event");
                    break 'event_loop Ok(());
                }

                // clear out finished tasks
                _ = task_handles.next(), if !task_handles.is_empty() => {}

                delivery = deliveries.next() => {
                    match delivery {
                        None => break 'event_loop Ok(()),
                        Some(Err(e)) => {
                            tracing::error!(error = ?e, "Consumer error");
                            break 'event_loop Err(QueueError::Consume(e));
                        }
                        Some(Ok(delivery)) => {
                            // Each delivery is processed in its own task: a slow (or panicking)
                            // consumer does not hold back the next deliveries.
                            let queue = self.clone();
                            let consumers = Arc::clone(&consumers);
                            task_handles.push(tokio::spawn(async move {
                                queue.process_message(delivery, &consumers).await
                            }));
                        }
                    }
                }
            }
        };

        // Make sure all tasks in flight complete before returning.
        while task_handles.next().await.is_some() {}

        result
    }

    /// Publish `message` with the routing key of its gate.
    #[tracing::instrument(name = "produce", skip_all, fields(message_type = %MessageType::of::<M>()))]
    pub async fn produce<M: Message>(&self, message: &M) -> Result<(), QueueError> {
        let gate = self.inner.gates.gate_for::<M>()?;
        let payload = serde_json::to_vec(message).map_err(QueueError::Encode)?;
        self.declare_produce_topology().await?;

        let envelope = MessageEnvelope::new(&self.inner.exchange, gate.routing_key(), payload)
            .with_content_type(APPLICATION_JSON.into());
        self.inner.producer.publish(envelope).await?;
        Ok(())
    }

    /// Retry `delivery` later, with a backoff growing with its number of attempts.
    pub async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.requeue_later(delivery, calculate_requeue_backoff(&delivery.properties))
            .await
    }

    /// Republish `delivery` on the delayed exchange to be retried in `delay_ms` milliseconds,
    /// then reject it.
    ///
    /// If republishing fails the delivery is left untouched: the broker still holds it.
    #[tracing::instrument(
        name = "requeue",
        skip_all,
        fields(routing_key = %delivery.routing_key.as_str(), delay_ms = delay_ms)
    )]
    pub async fn requeue_later(&self, delivery: &Delivery, delay_ms: u64) -> Result<(), QueueError> {
        self.declare_delay_topology().await?;

        let attempts = delivery.attempts().saturating_add(1);
        let mut headers = FieldTable::default();
        headers.insert(
            X_DELAY.into(),
            AMQPValue::LongLongInt(i64::try_from(delay_ms).unwrap_or(i64::MAX)),
        );
        headers.insert(X_ATTEMPTS.into(), AMQPValue::LongLongInt(attempts));

        let mut envelope = MessageEnvelope::new(
            delayed_exchange_name(&self.inner.exchange),
            delivery.routing_key.as_str(),
            delivery.data.clone(),
        )
        .with_headers(headers);
        if let Some(content_type) = delivery.properties.content_type() {
            envelope = envelope.with_content_type(content_type.clone());
        }
        if let Some(message_id) = delivery.properties.message_id() {
            envelope.properties = envelope.properties.with_message_id(message_id.clone());
        }

        // Publish first: if it fails, the original delivery is still pending.
        self.inner.delayer.publish(envelope).await?;
        match delivery.reject().await {
            Ok(()) | Err(DeliveryError::AlreadyFinalized) => {}
            Err(e) => return Err(QueueError::Finalize(e)),
        }

        tracing::info!(
            attempts,
            body = %delivery.body_preview(),
            "Message was requeued"
        );
        Ok(())
    }

    /// Route one delivery to its consumer.
    #[tracing::instrument(
        name = "process_message",
        skip_all,
        fields(routing_key = %delivery.routing_key.as_str()),
        level = "debug"
    )]
    async fn process_message(&self, delivery: Delivery, consumers: &Consumers) {
        let gate = match self
            .inner
            .gates
            .get_by_routing_key(delivery.routing_key.as_str())
        {
            Ok(gate) => gate,
            Err(e) => return drop_invalid_message(delivery, e).await,
        };
        let Some(consumer) = consumers.get(gate.message_type()) else {
            let e = GateError::UnknownMessageType(gate.message_type());
            return drop_invalid_message(delivery, e).await;
        };

        let message = match gate.decode(&delivery.data) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    attempts = delivery.attempts(),
                    body = %delivery.body_preview(),
                    "Could not deserialize the message"
                );
                if let Err(e) = self.requeue(&delivery).await {
                    tracing::error!(error = ?e, "Failed to requeue the message");
                }
                return;
            }
        };

        consumer.dispatch(self, delivery, message).await;
    }

    async fn declare_produce_topology(&self) -> Result<(), QueueError> {
        self.inner
            .produce_topology
            .get_or_try_init(|| async {
                self.inner
                    .produce_channel
                    .declare_exchange(&ExchangeDeclaration::topic(&self.inner.exchange))
                    .await
                    .map_err(QueueError::Topology)
            })
            .await?;
        Ok(())
    }

    async fn declare_delay_topology(&self) -> Result<(), QueueError> {
        self.inner
            .delay_topology
            .get_or_try_init(|| async {
                let channel = &self.inner.delay_channel;
                let exchange = ExchangeDeclaration::topic(&self.inner.exchange);
                let delayed = ExchangeDeclaration::delayed(&self.inner.exchange);
                channel
                    .declare_exchange(&exchange)
                    .await
                    .map_err(QueueError::Topology)?;
                channel
                    .declare_exchange(&delayed)
                    .await
                    .map_err(QueueError::Topology)?;
                channel
                    .bind_exchange(&exchange.name, &delayed.name, "")
                    .await
                    .map_err(QueueError::Topology)
            })
            .await?;
        Ok(())
    }
}

/// Messages nobody can consume are acked and dropped: retrying them would not help.
async fn drop_invalid_message(delivery: Delivery, error: GateError) {
    tracing::info!(
        error = %error,
        routing_key = %delivery.routing_key.as_str(),
        body = %delivery.body_preview(),
        "Received invalid message"
    );
    match delivery.ack().await {
        Ok(()) | Err(DeliveryError::AlreadyFinalized) => {}
        Err(e) => tracing::error!(error = ?e, "Failed to ack an invalid message"),
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("exchange", &self.inner.exchange)
            .field("gates", &self.inner.gates)
            .finish_non_exhaustive()
    }
}
