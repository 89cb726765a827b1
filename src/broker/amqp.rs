//! RabbitMQ channels over `lapin`.
//!
//! Every connect opens a dedicated connection and one channel in publisher-confirm
//! mode, so a publish only succeeds once the broker has taken the message.

use super::{BrokerChannel, BrokerConnector, Delivery};
use crate::config::MessageBusSettings;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    uri::{AMQPAuthority, AMQPQueryString, AMQPUri, AMQPUserInfo},
};
use tracing::debug;

const PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Connects to the broker described by [`MessageBusSettings`].
#[derive(Clone)]
pub struct AmqpConnector {
    uri: AMQPUri,
}

impl AmqpConnector {
    /// Builds the AMQP URI from the settings; nothing is connected yet.
    #[must_use]
    pub fn new(settings: &MessageBusSettings) -> Self {
        // AMQP heartbeats are whole seconds; 0 would disable them
        let heartbeat = settings.read_timeout.as_secs().clamp(1, u64::from(u16::MAX));
        let connection_timeout =
            u64::try_from(settings.connection_timeout.as_millis()).unwrap_or(u64::MAX);

        let uri = AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: settings.user_name.clone(),
                    password: settings.password.clone(),
                },
                host: settings.host.clone(),
                port: settings.port,
            },
            vhost: settings.virtual_host.clone(),
            query: AMQPQueryString {
                heartbeat: u16::try_from(heartbeat).ok(),
                connection_timeout: Some(connection_timeout),
                ..AMQPQueryString::default()
            },
            ..AMQPUri::default()
        };
        Self { uri }
    }
}

impl std::fmt::Debug for AmqpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let authority = &self.uri.authority;
        f.debug_struct("AmqpConnector")
            .field("user", &authority.userinfo.username)
            .field("host", &authority.host)
            .field("port", &authority.port)
            .field("vhost", &self.uri.vhost)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    type Channel = AmqpChannel;

    async fn connect(&self) -> Result<AmqpChannel> {
        debug!(
            host = %self.uri.authority.host,
            port = self.uri.authority.port,
            vhost = %self.uri.vhost,
            "Connecting to broker"
        );
        let connection =
            Connection::connect_uri(self.uri.clone(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(AmqpChannel {
            connection,
            channel,
            consumer: None,
        })
    }
}

/// One `lapin` connection with a single channel on it.
pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    consumer: Option<Consumer>,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn declare_queue(&mut self, queue: &str) -> Result<()> {
        let options = QueueDeclareOptions {
            durable: true,
            exclusive: false,
            auto_delete: false,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<()> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());
        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;
        if confirmation.is_nack() {
            return Err(Error::broker(format!(
                "broker rejected message published to '{queue}'"
            )));
        }
        Ok(())
    }

    async fn start_consuming(&mut self, queue: &str, consumer_tag: &str) -> Result<()> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| Error::broker("channel has no active subscription"))?;
        match consumer.next().await {
            Some(Ok(mut delivery)) => Ok(Some(Delivery {
                delivery_tag: delivery.delivery_tag,
                payload: std::mem::take(&mut delivery.data),
                redelivered: delivery.redelivered,
            })),
            Some(Err(err)) => Err(err.into()),
            None => Ok(None),
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let options = BasicNackOptions {
            requeue,
            ..BasicNackOptions::default()
        };
        self.channel.basic_nack(delivery_tag, options).await?;
        Ok(())
    }

    async fn close(self) -> Result<()> {
        if self.channel.status().connected() {
            self.channel.close(REPLY_SUCCESS, "OK").await?;
        }
        if self.connection.status().connected() {
            self.connection.close(REPLY_SUCCESS, "OK").await?;
        }
        Ok(())
    }
}
