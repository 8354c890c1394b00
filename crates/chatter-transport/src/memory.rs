//! In-process fanout broker.
//!
//! `MemoryBroker` mirrors the AMQP topology chatter relies on: fanout topics,
//! server-named exclusive queues, bindings, and queue deletion that ends the
//! delivery stream. Every clone of a broker shares the same topology, so many
//! sessions inside one process can talk to each other through it.

use crate::traits::{
    Broker, BrokerChannel, BrokerConnection, Deliveries, QueueName, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use futures_util::stream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Identifier of a connection to the memory broker.
type ConnectionId = u64;

/// A queue and the connection that owns it.
struct QueueEntry {
    owner: ConnectionId,
    sender: mpsc::UnboundedSender<Bytes>,
    /// Taken by the first consumer.
    receiver: Option<mpsc::UnboundedReceiver<Bytes>>,
}

/// Shared topology.
struct BrokerState {
    /// Topic name -> names of bound queues.
    topics: DashMap<String, DashSet<QueueName>>,
    /// Queues indexed by name.
    queues: DashMap<QueueName, QueueEntry>,
    next_id: AtomicU64,
    reachable: AtomicBool,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            topics: DashMap::new(),
            queues: DashMap::new(),
            next_id: AtomicU64::new(1),
            reachable: AtomicBool::new(true),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Check that `queue` exists and belongs to `owner`.
    fn check_owner(&self, queue: &str, owner: ConnectionId) -> Result<(), String> {
        match self.queues.get(queue) {
            Some(entry) if entry.owner == owner => Ok(()),
            Some(_) => Err(format!("queue '{queue}' is exclusive to another connection")),
            None => Err(format!("no queue '{queue}'")),
        }
    }

    /// Remove a queue and every binding that points at it.
    ///
    /// Dropping the queue's sender ends its delivery stream.
    fn remove_queue(&self, queue: &str) -> bool {
        let removed = self.queues.remove(queue).is_some();
        if removed {
            for bindings in self.topics.iter() {
                bindings.remove(queue);
            }
            debug!(queue = %queue, "Deleted queue");
        }
        removed
    }

    /// Remove every queue owned by a closing connection.
    fn drop_connection_queues(&self, owner: ConnectionId) {
        let owned: Vec<QueueName> = self
            .queues
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.key().clone())
            .collect();

        for queue in owned {
            self.remove_queue(&queue);
        }
    }
}

/// An in-process broker with AMQP-like fanout semantics.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        info!("Creating in-memory broker");
        Self {
            state: Arc::new(BrokerState::new()),
        }
    }

    /// Make the broker accept or refuse new connections.
    ///
    /// Existing connections are unaffected.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Check if a topic has been declared.
    #[must_use]
    pub fn topic_exists(&self, topic: &str) -> bool {
        self.state.topics.contains_key(topic)
    }

    /// Check if a queue exists.
    #[must_use]
    pub fn queue_exists(&self, queue: &str) -> bool {
        self.state.queues.contains_key(queue)
    }

    /// Number of queues currently bound to a topic.
    #[must_use]
    pub fn bound_queue_count(&self, topic: &str) -> usize {
        self.state
            .topics
            .get(topic)
            .map(|bindings| bindings.len())
            .unwrap_or(0)
    }

    /// Total number of live queues.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.state.queues.len()
    }

    /// All declared topic names.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.state.topics.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(
        &self,
        host: &str,
        port: Option<u16>,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Connection(format!(
                "broker at {host} refused the connection"
            )));
        }

        let id = self.state.next_id();
        debug!(connection = id, host = %host, port = ?port, "Memory connection opened");

        Ok(Box::new(MemoryConnection {
            id,
            state: Arc::clone(&self.state),
            open: Arc::new(AtomicBool::new(true)),
        }))
    }

    fn name(&self) -> &'static str {
        "in-memory broker"
    }
}

/// A connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    id: ConnectionId,
    state: Arc<BrokerState>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        Ok(Box::new(MemoryChannel {
            connection: self.id,
            state: Arc::clone(&self.state),
            connection_open: Arc::clone(&self.open),
            open: AtomicBool::new(true),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        self.state.drop_connection_queues(self.id);
        debug!(connection = self.id, "Memory connection closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// A channel on a [`MemoryConnection`].
pub struct MemoryChannel {
    connection: ConnectionId,
    state: Arc<BrokerState>,
    connection_open: Arc<AtomicBool>,
    open: AtomicBool,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if !self.connection_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_topic(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_open()?;

        self.state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                debug!(topic = %topic, "Declared topic");
                DashSet::new()
            });
        Ok(())
    }

    async fn declare_exclusive_queue(&self) -> Result<QueueName, TransportError> {
        self.ensure_open()?;

        let name = format!("amq.gen-{:012x}", self.state.next_id());
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.queues.insert(
            name.clone(),
            QueueEntry {
                owner: self.connection,
                sender,
                receiver: Some(receiver),
            },
        );

        debug!(queue = %name, connection = self.connection, "Declared exclusive queue");
        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.state
            .check_owner(queue, self.connection)
            .map_err(TransportError::Topology)?;

        let bindings = self
            .state
            .topics
            .get(topic)
            .ok_or_else(|| TransportError::Topology(format!("no topic '{topic}'")))?;
        bindings.insert(queue.to_string());

        debug!(queue = %queue, topic = %topic, "Bound queue");
        Ok(())
    }

    async fn unbind_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.state
            .check_owner(queue, self.connection)
            .map_err(TransportError::Topology)?;

        let bindings = self
            .state
            .topics
            .get(topic)
            .ok_or_else(|| TransportError::Topology(format!("no topic '{topic}'")))?;
        bindings.remove(queue);

        debug!(queue = %queue, topic = %topic, "Unbound queue");
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.ensure_open()?;

        if let Some(entry) = self.state.queues.get(queue) {
            if entry.owner != self.connection {
                return Err(TransportError::Topology(format!(
                    "queue '{queue}' is exclusive to another connection"
                )));
            }
        }

        self.state.remove_queue(queue);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.ensure_open()?;

        // Snapshot the bindings so no topic lock is held while queues are touched.
        let targets: Vec<QueueName> = self
            .state
            .topics
            .get(topic)
            .ok_or_else(|| TransportError::Publish(format!("no topic '{topic}'")))?
            .iter()
            .map(|queue| queue.key().clone())
            .collect();

        let mut delivered = 0usize;
        for queue in &targets {
            if let Some(entry) = self.state.queues.get(queue) {
                if entry.sender.send(payload.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        trace!(topic = %topic, recipients = delivered, "Published message");
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Deliveries, TransportError> {
        self.ensure_open()?;

        let mut entry = self
            .state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::Consume(format!("no queue '{queue}'")))?;
        if entry.owner != self.connection {
            return Err(TransportError::Consume(format!(
                "queue '{queue}' is exclusive to another connection"
            )));
        }
        let receiver = entry.receiver.take().ok_or_else(|| {
            TransportError::Consume(format!("queue '{queue}' already has a consumer"))
        })?;
        drop(entry);

        debug!(queue = %queue, "Consumer attached");
        let deliveries = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|body| (Ok(body), receiver))
        });
        Ok(Deliveries::new(queue, deliveries))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }
}
