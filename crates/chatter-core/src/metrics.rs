//! Session metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding process installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const MESSAGES_PUBLISHED: &str = "chatter_messages_published_total";
    pub const PUBLISHED_BYTES: &str = "chatter_published_bytes_total";
    pub const MESSAGES_DELIVERED: &str = "chatter_messages_delivered_total";
    pub const CHANNEL_SWITCHES: &str = "chatter_channel_switches_total";
    pub const SESSIONS_CONNECTED: &str = "chatter_sessions_connected";
    pub const ERRORS_TOTAL: &str = "chatter_errors_total";
}

/// Describe all session metrics to the installed recorder.
pub fn describe() {
    metrics::describe_counter!(names::MESSAGES_PUBLISHED, "Chat messages handed to the broker");
    metrics::describe_counter!(names::PUBLISHED_BYTES, "Bytes of chat messages published");
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED,
        "Chat messages delivered to the output sink"
    );
    metrics::describe_counter!(names::CHANNEL_SWITCHES, "Successful channel switches");
    metrics::describe_gauge!(names::SESSIONS_CONNECTED, "Currently connected sessions");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Failed session operations");
}

/// Record a published message.
pub fn record_published(bytes: usize) {
    counter!(names::MESSAGES_PUBLISHED).increment(1);
    counter!(names::PUBLISHED_BYTES).increment(bytes as u64);
}

/// Record a delivered message.
pub fn record_delivered() {
    counter!(names::MESSAGES_DELIVERED).increment(1);
}

/// Record a channel switch.
pub fn record_switch() {
    counter!(names::CHANNEL_SWITCHES).increment(1);
}

/// Record a session connecting.
pub fn record_connected() {
    gauge!(names::SESSIONS_CONNECTED).increment(1.0);
}

/// Record a connected session going away.
pub fn record_disconnected() {
    gauge!(names::SESSIONS_CONNECTED).decrement(1.0);
}

/// Record a failed operation.
pub fn record_error(operation: &'static str, kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "op" => operation, "kind" => kind).increment(1);
}
