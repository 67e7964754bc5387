use crate::consumers::{Consumer, Job};
use crate::gates::Message;

/// Acks every job its inner [`Consumer`] processes successfully.
///
/// If the inner consumer fails the job is left untouched and the error is returned,
/// so that the queue can requeue it.
pub struct SingleConsumer<C> {
    inner: C,
}

impl<C> SingleConsumer<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl<M, C> Consumer<M> for SingleConsumer<C>
where
    M: Message,
    C: Consumer<M>,
{
    async fn consume(&self, job: &Job<M>) -> Result<(), anyhow::Error> {
        self.inner.consume(job).await?;
        job.ack().await?;
        Ok(())
    }
}
