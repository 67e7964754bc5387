use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

use crate::consumers::{panic_message, BatchConsumer, Consumer, Job};
use crate::gates::Message;

const DEFAULT_BATCH_SIZE: usize = 500;
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

/// Turns a [`BatchConsumer`] into a [`Consumer`], buffering jobs until
///
/// - the buffer holds `batch_size` jobs (500 by default), or
/// - `timeout` (200ms by default) elapses without new jobs coming in.
///
/// Every new job resets the timeout: it measures the time since the latest arrival.
///
/// `consume` only returns once the job it was given is out of the buffer: either its batch has
/// been flushed, or a newer job took over the batch window and will wait for the flush instead.
/// The latest job of a batch therefore keeps [`Queue::consume`](crate::queue::Queue::consume)
/// from returning before the batch is acked or requeued.
///
/// The whole buffer is then handed over to the inner consumer. If it succeeds every job of the
/// batch is acked, otherwise every job of the batch is requeued.
///
/// # Prefetch count
///
/// Jobs are only acked once their batch is flushed: the prefetch count of the queue caps how many
/// jobs can be accumulated at once. Pick a `batch_size` no larger than your prefetch count, or
/// batches will only ever be flushed by the timeout.
pub struct AccumulativeConsumer<M, C> {
    inner: Arc<C>,
    batch_size: usize,
    timeout: Duration,
    runtime: Option<Handle>,
    state: Arc<Mutex<Buffer<M>>>,
}

struct Buffer<M> {
    jobs: Vec<Job<M>>,
    // The delayed flush of the current batch window, if one is scheduled.
    pending: Option<AbortHandle>,
    // Bumped every time a delayed flush is scheduled: a delayed flush only runs if it is the
    // latest one.
    window: u64,
}

impl<M, C> AccumulativeConsumer<M, C>
where
    M: Message,
    C: BatchConsumer<M>,
{
    pub fn new(inner: C) -> Self {
        Self {
            inner: Arc::new(inner),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
            runtime: None,
            state: Arc::new(Mutex::new(Buffer {
                jobs: Vec::new(),
                pending: None,
                window: 0,
            })),
        }
    }

    /// Flush as soon as `batch_size` jobs have been accumulated.
    ///
    /// A `batch_size` of 0 is treated as 1.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Flush once `timeout` has elapsed since the latest job came in.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Schedule delayed flushes on `runtime` instead of the runtime `consume` is called from.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn schedule_flush(&self, window: u64) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let state = Arc::clone(&self.state);
        let timeout = self.timeout;
        let delayed_flush = async move {
            tokio::time::sleep(timeout).await;
            let jobs = {
                let mut state = state.lock().await;
                if state.window != window {
                    return;
                }
                state.pending = None;
                std::mem::take(&mut state.jobs)
            };
            flush(&*inner, jobs).await;
        };
        match &self.runtime {
            Some(runtime) => runtime.spawn(delayed_flush),
            None => tokio::spawn(delayed_flush),
        }
    }
}

#[async_trait::async_trait]
impl<M, C> Consumer<M> for AccumulativeConsumer<M, C>
where
    M: Message,
    C: BatchConsumer<M>,
{
    async fn consume(&self, job: &Job<M>) -> Result<(), anyhow::Error> {
        let delayed_flush = {
            let mut state = self.state.lock().await;
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            state.window = state.window.wrapping_add(1);
            state.jobs.push(job.clone());

            if state.jobs.len() >= self.batch_size {
                let jobs = std::mem::take(&mut state.jobs);
                drop(state);
                flush(&*self.inner, jobs).await;
                return Ok(());
            }

            let window = state.window;
            let delayed_flush = self.schedule_flush(window);
            state.pending = Some(delayed_flush.abort_handle());
            delayed_flush
        };

        match delayed_flush.await {
            Ok(()) => Ok(()),
            // A newer job took over the window: it waits for the flush in our place.
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(anyhow::anyhow!("The delayed flush of the batch failed: {e}")),
        }
    }
}

/// Hand `jobs` over to `consumer`, then ack all of them or requeue all of them.
#[tracing::instrument(name = "flush_batch", skip_all, fields(batch_size = jobs.len()))]
async fn flush<M, C>(consumer: &C, jobs: Vec<Job<M>>)
where
    M: Message,
    C: BatchConsumer<M>,
{
    if jobs.is_empty() {
        return;
    }

    let outcome = AssertUnwindSafe(consumer.consume(&jobs))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(anyhow::anyhow!(
                "The batch consumer panicked: {}",
                panic_message(panic.as_ref())
            ))
        });

    match outcome {
        Ok(()) => {
            for job in &jobs {
                if let Err(e) = job.ack().await {
                    tracing::error!(error = ?e, "Failed to ack a job of the batch");
                }
            }
        }
        Err(e) => {
            tracing::error!(error = ?e, "Batch consumer failed, requeueing the whole batch");
            for job in &jobs {
                if let Err(e) = job.requeue().await {
                    tracing::error!(
                        error = ?e,
                        routing_key = %job.delivery().routing_key.as_str(),
                        "Failed to requeue a job of the batch"
                    );
                }
            }
        }
    }
}
