//! Inbound consumer session - one queue, one handler, one delivery at a time.
//!
//! The session owns its broker channel. On every (re)connect it declares the queue
//! as durable, sets prefetch to 1 and subscribes with manual acknowledgements, so
//! exactly one delivery is unacknowledged at any moment. A delivery is acked when
//! the handler succeeds and nacked with requeue on any failure, including an
//! undecodable body. A lost connection is replaced after `reconnect_interval`;
//! whatever was in flight is redelivered by the broker.

use crate::{
    broker::{BrokerChannel, BrokerConnector, BrokerSession, Delivery},
    config::MessageBusSettings,
    errors::{Error, Result},
    messages::Envelope,
    scheduler::{Scheduler, Shutdown},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Applies one decoded envelope. An error means "not applied, deliver again".
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Envelope type carried on the handler's queue.
    type Message: Envelope;

    /// Handles one message.
    async fn handle(&self, message: Self::Message) -> Result<()>;
}

/// What happens to a delivery once the handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Positive acknowledgement
    Ack,
    /// Negative acknowledgement with requeue
    Requeue,
}

/// Consumes one queue with prefetch 1 and feeds it to `H`.
pub struct ConsumerSession<C: BrokerConnector, H: MessageHandler> {
    session: BrokerSession<C>,
    queue: String,
    consumer_tag: String,
    handler: H,
    reconnect_interval: Duration,
}

impl<C: BrokerConnector, H: MessageHandler> ConsumerSession<C, H> {
    /// Prefetch limit applied on every (re)connect.
    pub const PREFETCH: u16 = 1;

    /// Creates a disconnected session bound to `queue`.
    pub fn new(connector: C, bus: &MessageBusSettings, queue: impl Into<String>, handler: H) -> Self {
        let queue = queue.into();
        Self {
            session: BrokerSession::new(connector, bus, vec![queue.clone()])
                .with_prefetch(Self::PREFETCH),
            consumer_tag: format!("ledger-relay.{}.{}", H::Message::KIND, std::process::id()),
            queue,
            handler,
            reconnect_interval: bus.reconnect_interval,
        }
    }

    /// Decodes `delivery` and runs the handler on it.
    pub async fn dispatch(handler: &H, delivery: &Delivery) -> Disposition {
        let message = match H::Message::from_json(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    error = %err,
                    "Undecodable delivery, requeueing"
                );
                return Disposition::Requeue;
            }
        };

        let message_id = message.message_id();
        match handler.handle(message).await {
            Ok(()) => {
                debug!(%message_id, redelivered = delivery.redelivered, "Delivery handled");
                Disposition::Ack
            }
            Err(err) => {
                warn!(
                    %message_id,
                    error = %err,
                    transient = err.is_transient(),
                    "Handler failed, requeueing"
                );
                Disposition::Requeue
            }
        }
    }

    /// Consumes until shutdown, reconnecting with a fixed backoff after failures.
    ///
    /// Shutdown is observed between deliveries; a handler already running is
    /// allowed to finish and its delivery is settled before the channel closes.
    #[instrument(name = "consumer_session", skip_all, fields(queue = %self.queue, kind = H::Message::KIND))]
    pub async fn run<S: Scheduler>(mut self, scheduler: S, mut shutdown: Shutdown) {
        info!("Consumer session started");

        while !shutdown.is_triggered() {
            if let Err(err) = self.consume(&mut shutdown).await {
                self.session.invalidate();
                warn!(
                    error = %err,
                    backoff = ?self.reconnect_interval,
                    "Consumer lost its channel, reconnecting after backoff"
                );
                if !scheduler.sleep(self.reconnect_interval, &mut shutdown).await {
                    break;
                }
            }
        }

        self.session.close().await;
        info!("Consumer session stopped");
    }

    /// Subscribes and handles deliveries until shutdown (`Ok`) or a channel failure.
    async fn consume(&mut self, shutdown: &mut Shutdown) -> Result<()> {
        self.session
            .channel()
            .await?
            .start_consuming(&self.queue, &self.consumer_tag)
            .await?;
        info!(consumer_tag = %self.consumer_tag, "Subscribed");

        loop {
            let channel = self.session.current()?;
            let next = tokio::select! {
                biased;
                () = shutdown.wait() => return Ok(()),
                next = channel.next_delivery() => next?,
            };
            let Some(delivery) = next else {
                return Err(Error::broker("subscription cancelled by the broker"));
            };

            match Self::dispatch(&self.handler, &delivery).await {
                Disposition::Ack => self.session.ack(delivery.delivery_tag).await?,
                Disposition::Requeue => self.session.nack(delivery.delivery_tag, true).await?,
            }
        }
    }
}
