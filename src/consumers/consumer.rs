//! The `Consumer` and `BatchConsumer` traits.
use std::future::Future;
use std::sync::Arc;

use crate::consumers::Job;
use crate::gates::Message;

/// Implementers of the `Consumer` trait process the jobs of one message type, one at a time.
///
/// # Outcome
///
/// A consumer is responsible for finalizing the job it receives: call [`Job::ack`] once the job
/// has been processed, or wrap your consumer in a [`SingleConsumer`] to ack automatically on success.
///
/// If `consume` fails (or panics) the queue requeues the job with a backoff, unless the job
/// has already been finalized.
///
/// # Implementers
///
/// Implement `Consumer` for your own structs, or wrap an async closure in [`ConsumerFn`].
///
/// [`SingleConsumer`]: crate::consumers::SingleConsumer
#[async_trait::async_trait]
pub trait Consumer<M: Message>: Send + Sync + 'static {
    async fn consume(&self, job: &Job<M>) -> Result<(), anyhow::Error>;
}

/// Implementers of the `BatchConsumer` trait process the jobs of one message type in groups.
///
/// A `BatchConsumer` is registered on a queue through an
/// [`AccumulativeConsumer`](crate::consumers::AccumulativeConsumer), which acks every job of
/// the batch if `consume` succeeds and requeues all of them otherwise.
#[async_trait::async_trait]
pub trait BatchConsumer<M: Message>: Send + Sync + 'static {
    async fn consume(&self, jobs: &[Job<M>]) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl<M, C> Consumer<M> for Arc<C>
where
    M: Message,
    C: Consumer<M>,
{
    async fn consume(&self, job: &Job<M>) -> Result<(), anyhow::Error> {
        self.as_ref().consume(job).await
    }
}

#[async_trait::async_trait]
impl<M, C> BatchConsumer<M> for Arc<C>
where
    M: Message,
    C: BatchConsumer<M>,
{
    async fn consume(&self, jobs: &[Job<M>]) -> Result<(), anyhow::Error> {
        self.as_ref().consume(jobs).await
    }
}

/// A [`Consumer`] backed by an async function.
///
/// ```rust
/// use carrot_gates::consumers::{ConsumerFn, Job};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct UserRegistered {
///     email: String,
/// }
///
/// let consumer = ConsumerFn::new(|job: Job<UserRegistered>| async move {
///     println!("Welcome {}", job.message().email);
///     job.ack().await?;
///     Ok::<_, anyhow::Error>(())
/// });
/// ```
pub struct ConsumerFn<F>(F);

impl<F> ConsumerFn<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<M, F, Fut> Consumer<M> for ConsumerFn<F>
where
    M: Message,
    F: Fn(Job<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
{
    async fn consume(&self, job: &Job<M>) -> Result<(), anyhow::Error> {
        (self.0)(job.clone()).await
    }
}

/// A [`BatchConsumer`] backed by an async function.
pub struct BatchConsumerFn<F>(F);

impl<F> BatchConsumerFn<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<M, F, Fut> BatchConsumer<M> for BatchConsumerFn<F>
where
    M: Message,
    F: Fn(Vec<Job<M>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
{
    async fn consume(&self, jobs: &[Job<M>]) -> Result<(), anyhow::Error> {
        (self.0)(jobs.to_vec()).await
    }
}
