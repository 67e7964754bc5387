//! Provides pooling for a [`lapin::Channel`] and [`lapin::Connection`] using [`deadpool`].
//!
//! This module provides two key guarantees:
//! - Disposing of broken channels and recreating new ones on-demand.
//! - Reusing connection objects across channels to limit overhead.
//!
//! A [`ChannelPool`] implements [`Channel`](crate::amqp::Channel): use pools as the produce and
//! delay channels of a [`Queue`](crate::queue::Queue) to survive broken channels.
//!
//! ```rust
//! use carrot_gates::amqp::configuration::RabbitMqSettings;
//! use carrot_gates::pool::channel_pool;
//!
//! // Function for asyncness.
//! async fn example() -> anyhow::Result<()> {
//!     let pool = channel_pool(&RabbitMqSettings::default(), 4, 16)?;
//!
//!     // get a new Channel from the pool.
//!     let channel = pool.get().await?;
//!     Ok(())
//! }
//! ```

mod channel;
mod connection;
mod error;

use crate::amqp::configuration::RabbitMqSettings;
use crate::amqp::ConnectionFactory;

pub use channel::{ChannelManager, ChannelPool};
pub use connection::ConnectionPool;
pub use error::Error;

/// Build a [`ChannelPool`] of up to `max_channels` channels with publisher confirms, spread
/// over up to `max_connections` connections.
///
/// No connection is opened until a channel is requested.
pub fn channel_pool(
    settings: &RabbitMqSettings,
    max_connections: usize,
    max_channels: usize,
) -> Result<ChannelPool, anyhow::Error> {
    let connection_pool = ConnectionPool::builder(ConnectionFactory::new_from_config(settings)?)
        .max_size(max_connections)
        .build()?;
    Ok(ChannelPool::builder(ChannelManager::new(connection_pool))
        .max_size(max_channels)
        .build()?)
}
