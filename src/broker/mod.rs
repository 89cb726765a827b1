//! Broker abstraction - connector/channel traits and the owned [`BrokerSession`].
//!
//! A connector opens channels; a channel is one connection plus one channel on the
//! broker. Neither is shared: the relay loop and the consumer session each own a
//! [`BrokerSession`], which holds at most one channel and replaces it through an
//! explicit reconnect whenever it is missing or closed.

/// AMQP 0-9-1 implementation backed by `lapin`
pub mod amqp;
/// In-process broker used by tests and local runs
pub mod memory;

pub use amqp::AmqpConnector;
pub use memory::InMemoryBroker;

use crate::config::MessageBusSettings;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One message handed to a consumer and awaiting ack or nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge this delivery
    pub delivery_tag: u64,
    /// Raw message body
    pub payload: Vec<u8>,
    /// Whether the broker delivered this message before
    pub redelivered: bool,
}

/// Opens channels to the broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Channel type produced by this connector.
    type Channel: BrokerChannel;

    /// Opens a new connection and a channel on it.
    async fn connect(&self) -> Result<Self::Channel>;
}

/// A connection plus channel, used by exactly one owner at a time.
#[async_trait]
pub trait BrokerChannel: Send + 'static {
    /// Whether both the connection and the channel are still usable.
    fn is_open(&self) -> bool;

    /// Declares a durable, non-exclusive, non-auto-delete queue.
    async fn declare_queue(&mut self, queue: &str) -> Result<()>;

    /// Limits how many deliveries may be unacknowledged at once.
    async fn set_prefetch(&mut self, count: u16) -> Result<()>;

    /// Publishes a persistent message straight to `queue` (default exchange).
    async fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<()>;

    /// Subscribes to `queue` with manual acknowledgements.
    async fn start_consuming(&mut self, queue: &str, consumer_tag: &str) -> Result<()>;

    /// Waits for the next delivery.
    ///
    /// Returns `Ok(None)` when the broker cancelled the subscription and an error
    /// when the connection was lost.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>>;

    /// Positively acknowledges a delivery.
    async fn ack(&mut self, delivery_tag: u64) -> Result<()>;

    /// Negatively acknowledges a delivery, optionally asking for redelivery.
    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// Closes the channel, then the connection.
    async fn close(self) -> Result<()>;
}

/// Owned broker session with an explicit reconnect operation.
///
/// Every (re)connect declares the session's queues as durable and applies the
/// prefetch limit, if any. Publishing and acknowledging are bounded by the
/// configured write timeout; a failed operation drops the channel so the next
/// call reconnects.
pub struct BrokerSession<C: BrokerConnector> {
    connector: C,
    queues: Vec<String>,
    prefetch: Option<u16>,
    connection_timeout: Duration,
    write_timeout: Duration,
    channel: Option<C::Channel>,
}

impl<C: BrokerConnector> BrokerSession<C> {
    /// Creates a disconnected session that declares `queues` on every connect.
    #[must_use]
    pub fn new(connector: C, settings: &MessageBusSettings, queues: Vec<String>) -> Self {
        Self {
            connector,
            queues,
            prefetch: None,
            connection_timeout: settings.connection_timeout,
            write_timeout: settings.write_timeout,
            channel: None,
        }
    }

    /// Applies `count` as the prefetch limit on every (re)connect.
    #[must_use]
    pub const fn with_prefetch(mut self, count: u16) -> Self {
        self.prefetch = Some(count);
        self
    }

    /// Whether the session currently holds an open channel.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|channel| channel.is_open())
    }

    /// Returns the open channel, reconnecting first if it is missing or closed.
    pub async fn channel(&mut self) -> Result<&mut C::Channel> {
        if !self.is_open() {
            self.reconnect().await?;
        }
        self.current()
    }

    /// Returns the current channel without reconnecting.
    pub fn current(&mut self) -> Result<&mut C::Channel> {
        self.channel
            .as_mut()
            .ok_or_else(|| Error::broker("no open broker channel"))
    }

    /// Drops the current channel (if any) and opens a fresh one.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.close().await;

        let connector = &self.connector;
        let queues = &self.queues;
        let prefetch = self.prefetch;
        let connect = async move {
            let mut channel = connector.connect().await?;
            for queue in queues {
                channel.declare_queue(queue).await?;
            }
            if let Some(count) = prefetch {
                channel.set_prefetch(count).await?;
            }
            Ok::<_, Error>(channel)
        };

        let limit = self.connection_timeout;
        let channel = tokio::time::timeout(limit, connect).await.map_err(|_| {
            Error::broker(format!("connecting to the broker timed out after {limit:?}"))
        })??;

        info!(queues = ?self.queues, prefetch = ?self.prefetch, "Broker channel opened");
        self.channel = Some(channel);
        Ok(())
    }

    /// Forgets the current channel without a closing handshake.
    ///
    /// Used after a failure, when the channel is known to be unusable.
    pub fn invalidate(&mut self) {
        if self.channel.take().is_some() {
            debug!("Broker channel discarded");
        }
    }

    /// Publishes `payload` to `queue`, reconnecting first if needed.
    pub async fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<()> {
        let write_timeout = self.write_timeout;
        let channel = self.channel().await?;
        let result = with_timeout(write_timeout, "publish", channel.publish(queue, payload)).await;
        if result.is_err() {
            self.invalidate();
        }
        result
    }

    /// Acknowledges a delivery on the current channel.
    pub async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
        let write_timeout = self.write_timeout;
        let channel = self.current()?;
        let result = with_timeout(write_timeout, "ack", channel.ack(delivery_tag)).await;
        if result.is_err() {
            self.invalidate();
        }
        result
    }

    /// Negatively acknowledges a delivery on the current channel.
    pub async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let write_timeout = self.write_timeout;
        let channel = self.current()?;
        let result =
            with_timeout(write_timeout, "nack", channel.nack(delivery_tag, requeue)).await;
        if result.is_err() {
            self.invalidate();
        }
        result
    }

    /// Closes the channel, then the connection. Errors are logged, not returned.
    pub async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(err) = channel.close().await {
                warn!(error = %err, "Error while closing broker channel");
            }
        }
    }
}

async fn with_timeout<F>(limit: Duration, operation: &str, fut: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::broker(format!("{operation} timed out after {limit:?}")))?
}
