//! Channel sessions.
//!
//! A [`ChannelSession`] is one user's membership in the chat fabric. It maps
//! the user's current channel onto broker topology (a fanout topic plus a
//! private exclusive queue bound to it), keeps one consumer task on that
//! queue, and publishes the user's messages to the channel's topic.
//!
//! Every public operation reports failures as a single `Error <verb>: ...`
//! line through the output sink and never panics. The same error is also
//! returned so structured callers do not have to scrape the sink.

use crate::channel::{validate_channel_name, ChannelId};
use crate::consumer::ConsumerHandle;
use crate::message::outbound_body;
use crate::metrics;
use crate::sink::{DeliveryCallback, ForwardingCallback, NoopCallback, OutputSink};
use chatter_transport::{
    Broker, BrokerChannel, BrokerConnection, Deliveries, QueueName, TransportError,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default broker host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default channel joined on connect.
pub const DEFAULT_CHANNEL: &str = "general";

/// Username used when none is given.
pub const ANONYMOUS: &str = "Anonymous";

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `connect` was called on a connected session.
    #[error("already connected")]
    AlreadyConnected,

    /// The operation needs a connected session.
    #[error("not connected")]
    NotConnected,

    /// The session was closed.
    #[error("session is closed")]
    Closed,

    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// The broker rejected an operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Short name of the error class, used as a metrics label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyConnected | Self::NotConnected | Self::Closed => "state",
            Self::InvalidChannel(_) => "invalid_channel",
            Self::Transport(e) => e.kind(),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected yet, or a connect attempt failed.
    #[default]
    Disconnected,
    /// Connected and subscribed to the current channel.
    Connected,
    /// Closed for good.
    Closed,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker host.
    pub host: String,
    /// Broker port, or the broker's default when `None`.
    pub port: Option<u16>,
    /// Name prefixed to every outbound message.
    pub username: String,
    /// Channel joined on connect.
    pub channel: ChannelId,
}

impl SessionConfig {
    /// Create a configuration for `username` joining `channel` on the
    /// default host.
    #[must_use]
    pub fn new(username: impl Into<String>, channel: impl Into<ChannelId>) -> Self {
        Self {
            username: username.into(),
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// Set the broker endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: None,
            username: ANONYMOUS.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }
}

/// Public operations, for error lines and metrics labels.
#[derive(Debug, Clone, Copy)]
enum Operation {
    Connect,
    Switch,
    Send,
    Close,
}

impl Operation {
    fn verb(self) -> &'static str {
        match self {
            Self::Connect => "connecting",
            Self::Switch => "switching channel",
            Self::Send => "sending message",
            Self::Close => "closing connection",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Switch => "switch",
            Self::Send => "send",
            Self::Close => "close",
        }
    }
}

/// The queue bound to the current channel and the task consuming it.
#[derive(Debug)]
struct Subscription {
    queue: QueueName,
    consumer: ConsumerHandle,
}

/// One user's connection to the chat fabric.
pub struct ChannelSession {
    broker: Arc<dyn Broker>,
    host: String,
    port: Option<u16>,
    username: String,
    current_channel: ChannelId,
    sink: Arc<dyn OutputSink>,
    callback: Arc<dyn DeliveryCallback>,
    state: SessionState,
    connection: Option<Box<dyn BrokerConnection>>,
    channel: Option<Box<dyn BrokerChannel>>,
    subscription: Option<Subscription>,
    /// Consumers of queues left behind by a switch, draining until the broker
    /// ends their streams.
    retired: Vec<ConsumerHandle>,
}

impl ChannelSession {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, config: SessionConfig, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            broker,
            host: config.host,
            port: config.port,
            username: config.username,
            current_channel: config.channel,
            sink,
            callback: Arc::new(NoopCallback),
            state: SessionState::Disconnected,
            connection: None,
            channel: None,
            subscription: None,
            retired: Vec::new(),
        }
    }

    /// Deliver the raw body of every inbound message to `callback` as well.
    #[must_use]
    pub fn with_callback(mut self, callback: Arc<dyn DeliveryCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Deliver the raw body of every inbound message to a closure as well.
    #[must_use]
    pub fn on_message<F>(self, forward: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.with_callback(Arc::new(ForwardingCallback::new(forward)))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if the session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The channel the user currently occupies.
    #[must_use]
    pub fn current_channel(&self) -> &str {
        &self.current_channel
    }

    /// Name of the queue bound to the current channel, while connected.
    #[must_use]
    pub fn current_queue(&self) -> Option<&str> {
        self.subscription.as_ref().map(|s| s.queue.as_str())
    }

    /// The user's name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Broker port, if one was set.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Change the broker endpoint. Only allowed before connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is connected or closed.
    pub fn set_endpoint(&mut self, host: impl Into<String>, port: Option<u16>) -> Result<(), SessionError> {
        match self.state {
            SessionState::Disconnected => {
                self.host = host.into();
                self.port = port;
                Ok(())
            }
            SessionState::Connected => Err(SessionError::AlreadyConnected),
            SessionState::Closed => Err(SessionError::Closed),
        }
    }

    /// Connect to the broker and join the current channel.
    ///
    /// Calling this on a connected or closed session is reported as an error
    /// and changes nothing. If any step fails the partial connection is
    /// released and the session stays disconnected, so `connect` may be
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns the error that was reported through the sink.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Disconnected => {}
            SessionState::Connected => {
                return Err(self.report(Operation::Connect, SessionError::AlreadyConnected))
            }
            SessionState::Closed => return Err(self.report(Operation::Connect, SessionError::Closed)),
        }

        match self.establish().await {
            Ok(()) => {
                self.state = SessionState::Connected;
                metrics::record_connected();
                info!(
                    host = %self.host,
                    channel = %self.current_channel,
                    user = %self.username,
                    "Session connected"
                );
                self.sink
                    .write_line(&format!("Connected to {} at {}", self.broker.name(), self.host));
                self.sink
                    .write_line(&format!("Joined channel: {}", self.current_channel));
                Ok(())
            }
            Err(e) => {
                let e = self.report(Operation::Connect, e);
                self.release().await;
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<(), SessionError> {
        validate_channel_name(&self.current_channel).map_err(SessionError::InvalidChannel)?;

        let connection = self.broker.connect(&self.host, self.port).await?;
        let connection = self.connection.insert(connection);
        let channel = connection.open_channel().await?;
        let channel = self.channel.insert(channel);

        let (queue, deliveries) = join(channel.as_ref(), &self.current_channel).await?;
        let consumer = self.spawn_consumer(&self.current_channel, deliveries);
        self.subscription = Some(Subscription { queue, consumer });
        Ok(())
    }

    /// Leave the current channel and join `new_channel`.
    ///
    /// The new subscription is established first. If that fails, the half
    /// made queue is discarded and the session keeps its old channel, queue
    /// and consumer. Once it succeeds the old queue is unbound and deleted on
    /// a best-effort basis; a failure there does not undo the switch.
    ///
    /// Switching to the current channel keeps the existing subscription, so
    /// the channel never has two of this session's queues bound to it.
    ///
    /// Some brokers close the channel when a topology call fails (AMQP
    /// channel exceptions do). The old consumer dies with it, so the session
    /// then releases the connection and goes back to `Disconnected`; calling
    /// `connect` again rejoins the old channel.
    ///
    /// Deliveries already queued for the old channel may still be printed
    /// after this returns, always under the old channel's label.
    ///
    /// # Errors
    ///
    /// Returns the error that was reported through the sink.
    pub async fn switch_channel(&mut self, new_channel: &str) -> Result<(), SessionError> {
        if let Err(e) = self.ensure_connected() {
            return Err(self.report(Operation::Switch, e));
        }
        if let Err(reason) = validate_channel_name(new_channel) {
            return Err(self.report(Operation::Switch, SessionError::InvalidChannel(reason)));
        }
        if new_channel == self.current_channel {
            debug!(channel = %new_channel, "Already on channel");
            self.sink
                .write_line(&format!("Switched to channel: {new_channel}"));
            return Ok(());
        }
        let Some(channel) = self.channel.as_deref() else {
            return Err(self.report(Operation::Switch, SessionError::NotConnected));
        };

        debug!(from = %self.current_channel, to = %new_channel, "Switching channel");
        let (queue, deliveries) = match join(channel, new_channel).await {
            Ok(joined) => joined,
            Err(e) => {
                let e = self.report(Operation::Switch, e.into());
                if !channel.is_open() {
                    warn!(channel = %self.current_channel, "Broker channel lost during switch");
                    self.release().await;
                    self.state = SessionState::Disconnected;
                    metrics::record_disconnected();
                }
                return Err(e);
            }
        };

        // Channel name, queue and consumer change together.
        let consumer = self.spawn_consumer(new_channel, deliveries);
        let previous_channel =
            std::mem::replace(&mut self.current_channel, new_channel.to_string());
        let previous = self.subscription.replace(Subscription { queue, consumer });

        if let Some(old) = previous {
            if let Err(e) = self.retire_queue(&old.queue, &previous_channel).await {
                warn!(queue = %old.queue, channel = %previous_channel, error = %e, "Failed to retire old queue");
            }
            self.retired.retain(|consumer| !consumer.is_finished());
            self.retired.push(old.consumer);
        }

        metrics::record_switch();
        info!(from = %previous_channel, to = %self.current_channel, "Switched channel");
        self.sink
            .write_line(&format!("Switched to channel: {}", self.current_channel));
        Ok(())
    }

    /// Publish `text` to the current channel as `[username] text`.
    ///
    /// The message is fanned out to every subscriber of the channel,
    /// including this session. Sending never waits on message reception.
    ///
    /// # Errors
    ///
    /// Returns the error that was reported through the sink.
    pub async fn send_message(&self, text: &str) -> Result<(), SessionError> {
        if let Err(e) = self.ensure_connected() {
            return Err(self.report(Operation::Send, e));
        }
        let Some(channel) = self.channel.as_deref() else {
            return Err(self.report(Operation::Send, SessionError::NotConnected));
        };

        let body = outbound_body(&self.username, text);
        let size = body.len();
        match channel.publish(&self.current_channel, body).await {
            Ok(()) => {
                metrics::record_published(size);
                Ok(())
            }
            Err(e) => Err(self.report(Operation::Send, e.into())),
        }
    }

    /// Leave the current channel, stop all consumers and close the broker
    /// channel and connection.
    ///
    /// Safe to call any number of times, and on sessions that never
    /// connected. Failures along the way are reported and skipped.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        let was_connected = self.state == SessionState::Connected;
        self.release().await;
        self.state = SessionState::Closed;

        if was_connected {
            metrics::record_disconnected();
        }
        info!(user = %self.username, "Session closed");
    }

    /// Best-effort release of every broker resource the session holds.
    async fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = self
                .retire_queue(&subscription.queue, &self.current_channel)
                .await
            {
                self.report(Operation::Close, e.into());
            }
            subscription.consumer.abort();
        }

        for consumer in self.retired.drain(..) {
            consumer.abort();
        }

        if let Some(channel) = self.channel.take() {
            if channel.is_open() {
                if let Err(e) = channel.close().await {
                    self.report(Operation::Close, e.into());
                }
            }
        }

        if let Some(connection) = self.connection.take() {
            if connection.is_open() {
                if let Err(e) = connection.close().await {
                    self.report(Operation::Close, e.into());
                }
            }
        }
    }

    /// Unbind and delete a queue. Both steps are attempted; the first
    /// failure is returned.
    async fn retire_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError> {
        let Some(channel) = self.channel.as_deref() else {
            return Ok(());
        };
        if !channel.is_open() {
            return Ok(());
        }

        let unbound = channel.unbind_queue(queue, topic).await;
        let deleted = channel.delete_queue(queue).await;
        debug!(queue = %queue, topic = %topic, "Retired queue");
        unbound.and(deleted)
    }

    fn spawn_consumer(&self, channel: &str, deliveries: Deliveries) -> ConsumerHandle {
        ConsumerHandle::spawn(
            channel,
            deliveries,
            Arc::clone(&self.sink),
            Arc::clone(&self.callback),
        )
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected => Err(SessionError::NotConnected),
            SessionState::Closed => Err(SessionError::Closed),
        }
    }

    /// Write the error line for a failed operation and hand the error back.
    fn report(&self, operation: Operation, error: SessionError) -> SessionError {
        warn!(op = operation.label(), user = %self.username, error = %error, "Session operation failed");
        metrics::record_error(operation.label(), error.kind());
        self.sink
            .write_line(&format!("Error {}: {error}", operation.verb()));
        error
    }
}

/// Declare `topic`, create an exclusive queue, bind it and start consuming.
///
/// A queue that was created but could not be bound or consumed is deleted
/// again before the error is returned.
async fn join(
    channel: &dyn BrokerChannel,
    topic: &str,
) -> Result<(QueueName, Deliveries), TransportError> {
    channel.declare_topic(topic).await?;
    let queue = channel.declare_exclusive_queue().await?;

    let subscribed = async {
        channel.bind_queue(&queue, topic).await?;
        channel.consume(&queue).await
    }
    .await;

    match subscribed {
        Ok(deliveries) => {
            debug!(topic = %topic, queue = %queue, "Joined topic");
            Ok((queue, deliveries))
        }
        Err(e) => {
            if let Err(cleanup) = channel.delete_queue(&queue).await {
                warn!(queue = %queue, error = %cleanup, "Failed to discard half-made queue");
            }
            Err(e)
        }
    }
}
