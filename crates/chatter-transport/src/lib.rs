//! # chatter-transport
//!
//! Broker abstraction layer for the chatter chat client.
//!
//! This crate provides a unified interface over the message broker:
//!
//! - **Memory** - An in-process fanout broker, used for tests and offline runs
//! - **AMQP** - RabbitMQ via lapin (feature `amqp`)
//!
//! ## Broker Abstraction
//!
//! All brokers implement the `Broker`, `BrokerConnection` and `BrokerChannel`
//! traits, allowing sessions to be broker-agnostic.
//!
//! ```rust,ignore
//! use chatter_transport::{Broker, MemoryBroker};
//!
//! let broker = MemoryBroker::new();
//! let conn = broker.connect("localhost", None).await?;
//! let channel = conn.open_channel().await?;
//! channel.declare_topic("general").await?;
//! let queue = channel.declare_exclusive_queue().await?;
//! channel.bind_queue(&queue, "general").await?;
//! let mut deliveries = channel.consume(&queue).await?;
//! while let Some(Ok(body)) = deliveries.next().await {
//!     // Process body
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use memory::MemoryBroker;
pub use traits::{
    Broker, BrokerChannel, BrokerConnection, Deliveries, QueueName, TransportError,
};

#[cfg(feature = "amqp")]
pub use amqp::{AmqpBroker, AmqpConfig};
