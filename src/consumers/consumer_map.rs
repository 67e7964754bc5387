use futures_util::FutureExt;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::consumers::{panic_message, Consumer, Delivery, Job};
use crate::gates::{AnyMessage, Message, MessageType};
use crate::queue::Queue;

/// The consumers a queue dispatches jobs to, one per message type.
///
/// ```rust
/// use carrot_gates::consumers::{ConsumerFn, Consumers, Job, SingleConsumer};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct OrderPlaced {
///     order_id: u64,
/// }
///
/// let consumers = Consumers::new().with::<OrderPlaced, _>(SingleConsumer::new(ConsumerFn::new(
///     |job: Job<OrderPlaced>| async move {
///         println!("Order {} was placed", job.message().order_id);
///         Ok::<_, anyhow::Error>(())
///     },
/// )));
/// assert_eq!(1, consumers.len());
/// ```
#[derive(Default)]
pub struct Consumers {
    consumers: HashMap<MessageType, Arc<dyn Dispatch>>,
}

impl Consumers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` for messages of type `M`, replacing any consumer previously
    /// registered for `M`.
    #[must_use]
    pub fn with<M, C>(mut self, consumer: C) -> Self
    where
        M: Message,
        C: Consumer<M>,
    {
        self.consumers.insert(
            MessageType::of::<M>(),
            Arc::new(Typed {
                consumer,
                _message: PhantomData,
            }),
        );
        self
    }

    /// The message types with a registered consumer.
    pub fn message_types(&self) -> impl Iterator<Item = MessageType> + '_ {
        self.consumers.keys().copied()
    }

    pub fn contains(&self, message_type: MessageType) -> bool {
        self.consumers.contains_key(&message_type)
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub(crate) fn get(&self, message_type: MessageType) -> Option<&Arc<dyn Dispatch>> {
        self.consumers.get(&message_type)
    }
}

/// A consumer with its message type erased.
#[async_trait::async_trait]
pub(crate) trait Dispatch: Send + Sync + 'static {
    /// Build a job out of `delivery` and `message`, then run the consumer.
    /// Failures are handled by requeueing the job.
    async fn dispatch(&self, queue: &Queue, delivery: Delivery, message: AnyMessage);
}

struct Typed<M, C> {
    consumer: C,
    _message: PhantomData<fn() -> M>,
}

#[async_trait::async_trait]
impl<M, C> Dispatch for Typed<M, C>
where
    M: Message,
    C: Consumer<M>,
{
    async fn dispatch(&self, queue: &Queue, delivery: Delivery, message: AnyMessage) {
        let message = match message.downcast::<M>() {
            Ok(message) => *message,
            Err(_) => {
                // Gates and consumers are both keyed by message type: this is a bug.
                tracing::error!(
                    routing_key = %delivery.routing_key.as_str(),
                    message_type = %MessageType::of::<M>(),
                    "The decoded message does not match the type of its consumer"
                );
                if let Err(e) = queue.requeue(&delivery).await {
                    tracing::error!(error = ?e, "Failed to requeue the message");
                }
                return;
            }
        };

        let job = Job::new(queue.clone(), delivery, message);
        let outcome = AssertUnwindSafe(self.consumer.consume(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(anyhow::anyhow!(
                    "The consumer panicked: {}",
                    panic_message(panic.as_ref())
                ))
            });

        if let Err(e) = outcome {
            tracing::error!(
                error = ?e,
                routing_key = %job.delivery().routing_key.as_str(),
                attempts = job.delivery().attempts(),
                body = %job.delivery().body_preview(),
                "Could not consume the message"
            );
            // The consumer might have finalized the job before failing: requeue through the job
            // to avoid finalizing the delivery twice.
            if let Err(e) = job.requeue().await {
                tracing::error!(error = ?e, "Failed to requeue the message");
            }
        }
    }
}
