//! Broker abstraction traits for chatter.
//!
//! These traits describe the small slice of broker topology a chat client
//! needs: fanout topics, exclusive subscription queues, bindings, publishing
//! and consuming. Sessions are written against them so the same code runs on
//! RabbitMQ and on the in-process broker.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use thiserror::Error;

/// Broker-assigned name of a subscription queue.
pub type QueueName = String;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker could not be reached or refused the connection.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Declaring, binding, unbinding or deleting a topic or queue failed.
    #[error("Topology operation failed: {0}")]
    Topology(String),

    /// A message could not be handed to the broker.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The delivery subscription failed to establish or was interrupted.
    #[error("Consume failed: {0}")]
    Consume(String),

    /// The broker channel was already closed.
    #[error("Channel closed")]
    ChannelClosed,

    /// The broker connection was already closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl TransportError {
    /// Short name of the error class, used as a metrics label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) | Self::ConnectionClosed => "connection",
            Self::Topology(_) => "topology",
            Self::Publish(_) => "publish",
            Self::Consume(_) => "consume",
            Self::ChannelClosed => "channel",
        }
    }
}

/// A broker that can open connections.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connect to the broker at `host`, using the broker's default port when
    /// `port` is `None`.
    async fn connect(
        &self,
        host: &str,
        port: Option<u16>,
    ) -> Result<Box<dyn BrokerConnection>, TransportError>;

    /// Human readable broker name (e.g. "RabbitMQ").
    fn name(&self) -> &'static str;
}

/// A live connection to a broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a communication channel multiplexed over this connection.
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError>;

    /// Close the connection. Exclusive queues owned by it are dropped by the
    /// broker.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

/// A broker channel: the handle every topology and messaging call goes
/// through.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a fanout topic. Declaring an existing topic is a no-op.
    async fn declare_topic(&self, topic: &str) -> Result<(), TransportError>;

    /// Declare an anonymous, exclusive queue and return its broker-assigned
    /// name.
    async fn declare_exclusive_queue(&self) -> Result<QueueName, TransportError>;

    /// Bind a queue to a topic.
    async fn bind_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError>;

    /// Remove the binding between a queue and a topic.
    async fn unbind_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError>;

    /// Delete a queue. This ends any delivery stream reading from it.
    async fn delete_queue(&self, queue: &str) -> Result<(), TransportError>;

    /// Publish a payload to every queue bound to `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Start consuming a queue. Deliveries are acknowledged on receipt.
    async fn consume(&self, queue: &str) -> Result<Deliveries, TransportError>;

    /// Close the channel.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the channel is still open.
    fn is_open(&self) -> bool;
}

/// Stream of message bodies delivered from one queue.
///
/// The stream ends when the queue is deleted or its connection closes.
pub struct Deliveries {
    queue: QueueName,
    inner: BoxStream<'static, Result<Bytes, TransportError>>,
}

impl Deliveries {
    /// Wrap a stream of deliveries for `queue`.
    pub fn new<S>(queue: impl Into<QueueName>, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self {
            queue: queue.into(),
            inner: stream.boxed(),
        }
    }

    /// Name of the queue these deliveries come from.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the next delivery.
    ///
    /// Returns `None` once the queue is gone.
    pub async fn next(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.inner.next().await
    }
}

impl fmt::Debug for Deliveries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deliveries")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn test_deliveries_yield_then_end() {
        let items = vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))];
        let mut deliveries = Deliveries::new("q-1", stream::iter(items));

        assert_eq!(deliveries.queue(), "q-1");
        assert_eq!(&deliveries.next().await.unwrap().unwrap()[..], b"a");
        assert_eq!(&deliveries.next().await.unwrap().unwrap()[..], b"b");
        assert!(deliveries.next().await.is_none());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(TransportError::Topology("x".into()).kind(), "topology");
        assert_eq!(TransportError::ConnectionClosed.kind(), "connection");
        assert_eq!(
            TransportError::Publish("no route".into()).to_string(),
            "Publish failed: no route"
        );
    }
}
