//! AMQP 0-9-1 broker implementation.
//!
//! This module talks to RabbitMQ (or any AMQP 0-9-1 broker) using lapin.
//! Topics map to non-durable fanout exchanges, subscriptions to server-named
//! exclusive queues.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info};

use crate::traits::{
    Broker, BrokerChannel, BrokerConnection, Deliveries, QueueName, TransportError,
};

/// Default AMQP port.
pub const DEFAULT_AMQP_PORT: u16 = 5672;

/// Reply code sent when closing channels and connections.
const REPLY_SUCCESS: u16 = 200;

/// AMQP broker configuration.
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    /// Virtual host.
    pub vhost: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            vhost: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

/// A RabbitMQ broker reached over AMQP 0-9-1.
#[derive(Debug, Clone, Default)]
pub struct AmqpBroker {
    config: AmqpConfig,
}

impl AmqpBroker {
    /// Create a broker handle with default credentials.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broker handle with a specific configuration.
    #[must_use]
    pub fn with_config(config: AmqpConfig) -> Self {
        Self { config }
    }

    /// Build the connection URI for a host and port.
    #[must_use]
    pub fn uri(&self, host: &str, port: Option<u16>) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.config.username,
            self.config.password,
            host,
            port.unwrap_or(DEFAULT_AMQP_PORT),
            encode_vhost(&self.config.vhost)
        )
    }
}

/// Percent-encode the vhost path segment (`/` is `%2f`).
fn encode_vhost(vhost: &str) -> String {
    vhost.replace('%', "%25").replace('/', "%2f")
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(
        &self,
        host: &str,
        port: Option<u16>,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let uri = self.uri(host, port);
        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        info!(host = %host, port = port.unwrap_or(DEFAULT_AMQP_PORT), "AMQP connection established");
        Ok(Box::new(AmqpConnection { inner: connection }))
    }

    fn name(&self) -> &'static str {
        "RabbitMQ"
    }
}

/// A live AMQP connection.
pub struct AmqpConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        debug!(channel = channel.id(), "AMQP channel opened");
        Ok(Box::new(AmqpChannel { inner: channel }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.inner
            .close(REPLY_SUCCESS, "Bye")
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }
}

/// An AMQP channel.
pub struct AmqpChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_topic(&self, topic: &str) -> Result<(), TransportError> {
        self.inner
            .exchange_declare(
                topic,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Topology(e.to_string()))
    }

    async fn declare_exclusive_queue(&self) -> Result<QueueName, TransportError> {
        let options = QueueDeclareOptions {
            exclusive: true,
            auto_delete: true,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .inner
            .queue_declare("", options, FieldTable::default())
            .await
            .map_err(|e| TransportError::Topology(e.to_string()))?;

        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError> {
        self.inner
            .queue_bind(
                queue,
                topic,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Topology(e.to_string()))
    }

    async fn unbind_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError> {
        self.inner
            .queue_unbind(queue, topic, "", FieldTable::default())
            .await
            .map_err(|e| TransportError::Topology(e.to_string()))
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.inner
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Topology(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.inner
            .basic_publish(
                topic,
                "",
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn consume(&self, queue: &str) -> Result<Deliveries, TransportError> {
        let options = BasicConsumeOptions {
            no_ack: true,
            ..BasicConsumeOptions::default()
        };
        let consumer = self
            .inner
            .basic_consume(queue, "", options, FieldTable::default())
            .await
            .map_err(|e| TransportError::Consume(e.to_string()))?;

        let deliveries = consumer.map(|delivery| {
            delivery
                .map(|delivery| Bytes::from(delivery.data))
                .map_err(|e| TransportError::Consume(e.to_string()))
        });
        Ok(Deliveries::new(queue, deliveries))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        self.inner
            .close(REPLY_SUCCESS, "Bye")
            .await
            .map_err(|e| TransportError::Topology(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }
}
