//! Implements [`Manager`] for [`lapin::Channel`], and [`Channel`] for the resulting pool.
use deadpool::managed::{self, Manager};
use lapin::{options::ConfirmSelectOptions, ChannelState};

use super::connection::ConnectionPool;
use crate::amqp::topology::ExchangeDeclaration;
use crate::amqp::{Channel, DeliveryStream};
use crate::publishers::{MessageEnvelope, PublisherError};

/// `ChannelPool` pools [`lapin::Channel`]s.
///
/// It maintains an internal pool of connections to the rabbitmq instance.
///
/// `ChannelPool` is itself a [`Channel`]: every operation is carried out on a healthy channel
/// taken from the pool, so a [`Queue`](crate::queue::Queue) built on top of pools recovers from
/// broken channels.
pub type ChannelPool = deadpool::managed::Pool<ChannelManager>;

/// `ChannelManager` implements [Manager] to manage a pool of [`lapin::Channel`]s.
///
/// `ChannelManager` keeps an internal [`ConnectionPool`]
///  in order to reuse connections across channels.
pub struct ChannelManager {
    connection_pool: ConnectionPool,
    publisher_confirms: bool,
}

impl ChannelManager {
    /// By default, all channels will have publisher confirmations enabled,
    /// but you can opt out using [`ChannelManager::without_publisher_confirmations`]
    pub fn new(connection_pool: ConnectionPool) -> Self {
        Self {
            connection_pool,
            publisher_confirms: true,
        }
    }

    /// Disable publisher confirmations.
    pub fn without_publisher_confirmations(mut self) -> Self {
        self.publisher_confirms = false;
        self
    }
}

#[async_trait::async_trait]
impl Manager for ChannelManager {
    type Type = lapin::Channel;
    type Error = super::Error;

    async fn create(&self) -> Result<lapin::Channel, super::Error> {
        let connection = self.connection_pool.get().await?;
        let channel = connection.create_channel().await?;
        if self.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await?;
        }
        Ok(channel)
    }

    async fn recycle(&self, obj: &mut lapin::Channel) -> managed::RecycleResult<super::Error> {
        match obj.status().state() {
            ChannelState::Connected => Ok(()),
            state => Err(managed::RecycleError::Message(format!(
                "Channel is not in an healthy state {state:?}",
            ))),
        }
    }
}

async fn pooled(pool: &ChannelPool) -> Result<managed::Object<ChannelManager>, super::Error> {
    Ok(pool.get().await?)
}

#[async_trait::async_trait]
impl Channel for ChannelPool {
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), anyhow::Error> {
        let channel = pooled(self).await?;
        Channel::declare_exchange(&*channel, exchange).await
    }

    async fn declare_queue(&self, queue_name: &str) -> Result<(), anyhow::Error> {
        let channel = pooled(self).await?;
        Channel::declare_queue(&*channel, queue_name).await
    }

    async fn bind_queue(
        &self,
        queue_name: &str,
        exchange_name: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error> {
        let channel = pooled(self).await?;
        Channel::bind_queue(&*channel, queue_name, exchange_name, routing_key).await
    }

    async fn bind_exchange(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error> {
        let channel = pooled(self).await?;
        Channel::bind_exchange(&*channel, destination, source, routing_key).await
    }

    /// Prefetch limits are per channel: they cannot be applied to a pool.
    /// Consume from a dedicated [`lapin::Channel`] if you need them.
    async fn set_qos(&self, _prefetch_count: u16) -> Result<(), anyhow::Error> {
        tracing::debug!("Prefetch count is not applied to pooled channels");
        Ok(())
    }

    async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), PublisherError> {
        let channel = pooled(self).await?;
        Channel::publish(&*channel, envelope).await
    }

    async fn consume(&self, queue_name: &str) -> Result<DeliveryStream, anyhow::Error> {
        let channel = pooled(self).await?;
        Channel::consume(&*channel, queue_name).await
    }
}
