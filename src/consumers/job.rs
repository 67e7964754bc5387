use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

use crate::consumers::{Delivery, DeliveryError};
use crate::gates::Message;
use crate::queue::{Queue, QueueError};

/// A decoded message, together with the delivery it came from.
///
/// `Job` is what [`Consumer`](crate::consumers::Consumer)s receive.
/// It is cheap to clone: clones share the same underlying delivery, hence finalizing one of them
/// finalizes all of them.
pub struct Job<M> {
    inner: Arc<JobInner<M>>,
}

struct JobInner<M> {
    queue: Queue,
    delivery: Delivery,
    message: M,
    // Raw body, parsed on first access.
    body: OnceCell<serde_json::Value>,
}

impl<M> Clone for Job<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Message> Job<M> {
    /// Wrap an already-decoded `message` with the `delivery` it was decoded from.
    ///
    /// The queue takes care of building jobs when consuming: `new` is mostly useful to
    /// unit-test your consumers.
    pub fn new(queue: Queue, delivery: Delivery, message: M) -> Self {
        Self {
            inner: Arc::new(JobInner {
                queue,
                delivery,
                message,
                body: OnceCell::new(),
            }),
        }
    }

    /// The typed message.
    pub fn message(&self) -> &M {
        &self.inner.message
    }

    pub fn delivery(&self) -> &Delivery {
        &self.inner.delivery
    }

    /// The raw body of the delivery as a JSON document.
    ///
    /// The body is parsed on the first call; the outcome is cached for later calls.
    /// A parsing failure is returned as is and nothing is cached.
    pub fn body(&self) -> Result<&serde_json::Value, serde_json::Error> {
        self.inner
            .body
            .get_or_try_init(|| serde_json::from_slice(&self.inner.delivery.data))
    }

    /// Mark the job as successfully processed.
    ///
    /// Acking a job that was already finalized is a no-op.
    pub async fn ack(&self) -> Result<(), DeliveryError> {
        ignore_already_finalized(self.inner.delivery.ack().await)
    }

    /// Give up on the job: the broker will neither redeliver nor retry it.
    ///
    /// Nacking a job that was already finalized is a no-op.
    pub async fn nack(&self) -> Result<(), DeliveryError> {
        ignore_already_finalized(self.inner.delivery.nack().await)
    }

    /// Retry the job later, with a backoff growing with the number of attempts.
    ///
    /// Requeueing a job that was already finalized is a no-op.
    pub async fn requeue(&self) -> Result<(), QueueError> {
        if self.inner.delivery.is_processed() {
            tracing::debug!(
                routing_key = %self.inner.delivery.routing_key.as_str(),
                "The job was already finalized, skipping requeue"
            );
            return Ok(());
        }
        self.inner.queue.requeue(&self.inner.delivery).await
    }
}

fn ignore_already_finalized(result: Result<(), DeliveryError>) -> Result<(), DeliveryError> {
    match result {
        Err(DeliveryError::AlreadyFinalized) => {
            tracing::debug!("The delivery was already finalized");
            Ok(())
        }
        result => result,
    }
}

impl<M: fmt::Debug> fmt::Debug for Job<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("delivery", &self.inner.delivery)
            .field("message", &self.inner.message)
            .finish()
    }
}
