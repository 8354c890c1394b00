//! # chatter-core
//!
//! Channel sessions for the chatter chat client.
//!
//! This crate provides the pieces a front end drives:
//!
//! - **Session** - One user's channel membership, sends and lifecycle
//! - **Consumer** - Background task printing deliveries of one queue
//! - **Sink** - Where status, error and chat lines go
//! - **Message** - Chat line formats
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  publish   ┌─────────────┐  fanout   ┌─────────────┐
//! │   Session   │───────────▶│    Topic    │──────────▶│    Queue    │
//! └─────────────┘            └─────────────┘           └─────────────┘
//!        │                                                    │
//!        │ status / errors                                    ▼
//!        ▼                                             ┌─────────────┐
//! ┌─────────────┐            [channel] [user] text     │  Consumer   │
//! │    Sink     │◀─────────────────────────────────────│    task     │
//! └─────────────┘                                      └─────────────┘
//! ```

pub mod channel;
pub mod consumer;
pub mod message;
pub mod metrics;
pub mod session;
pub mod sink;

pub use channel::{validate_channel_name, ChannelId, MAX_CHANNEL_NAME_LENGTH};
pub use consumer::ConsumerHandle;
pub use session::{ChannelSession, SessionConfig, SessionError, SessionState};
pub use sink::{
    DeliveryCallback, ForwardingCallback, MemorySink, NoopCallback, OutputSink, StdoutSink,
};
