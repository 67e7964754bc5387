//! The [`Queue`] orchestrator: typed produce, consume with dispatch to [`Consumers`], and
//! delayed retries with exponential backoff.
//!
//! ```rust,no_run
//! use carrot_gates::consumers::{ConsumerFn, Consumers, Job, SingleConsumer};
//! use carrot_gates::gates::{MessageGate, MessageGateRegistry};
//! use carrot_gates::queue::Queue;
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct InvoicePaid {
//!     invoice_id: u64,
//! }
//!
//! async fn run(connection: &lapin::Connection) -> Result<(), anyhow::Error> {
//!     let gates = MessageGateRegistry::new([MessageGate::new::<InvoicePaid>("invoice.paid")])?;
//!     let queue = Queue::builder("billing", gates).connect(connection).await?;
//!
//!     queue.produce(&InvoicePaid { invoice_id: 42 }).await?;
//!
//!     let consumers = Consumers::new().with::<InvoicePaid, _>(SingleConsumer::new(
//!         ConsumerFn::new(|job: Job<InvoicePaid>| async move {
//!             println!("Invoice {} was paid", job.message().invoice_id);
//!             Ok::<_, anyhow::Error>(())
//!         }),
//!     ));
//!     queue.consume("billing.invoices", consumers).await?;
//!     Ok(())
//! }
//! ```
//!
//! [`Consumers`]: crate::consumers::Consumers
pub mod backoff;
mod builder;
mod error;
#[allow(clippy::module_inception)]
mod queue;

pub use backoff::{MAX_DELAY_SECONDS, X_ATTEMPTS, X_DELAY};
pub use builder::QueueBuilder;
pub use error::QueueError;
pub use queue::Queue;
