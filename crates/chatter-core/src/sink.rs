//! Output collaborators of a session.
//!
//! A session reports everything through an [`OutputSink`]: status lines,
//! errors and rendered chat lines. A [`DeliveryCallback`] additionally gets
//! the raw body of each delivery, for front ends that keep their own history.
//! Both may be called concurrently from the caller's task and the consumer
//! task.

use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

/// Line-oriented text output.
pub trait OutputSink: Send + Sync {
    /// Append one line.
    fn write_line(&self, line: &str);
}

/// Writes lines to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
            warn!(error = %e, "Failed to write to stdout");
        }
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    written: Notify,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check if any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }

    /// Number of lines containing `needle`.
    #[must_use]
    pub fn count(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    /// Wait until a line containing `needle` is written.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for(&self, needle: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            // Register before checking so a write in between is not missed.
            let written = self.written.notified();
            if self.contains(needle) {
                return true;
            }
            if tokio::time::timeout_at(deadline, written).await.is_err() {
                return self.contains(needle);
            }
        }
    }
}

impl OutputSink for MemorySink {
    fn write_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        self.written.notify_waiters();
    }
}

/// Receives the raw body of every delivery.
pub trait DeliveryCallback: Send + Sync {
    /// Called once per delivery, after the sink line for it is written.
    fn on_message(&self, body: &str);
}

/// A callback that ignores deliveries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl DeliveryCallback for NoopCallback {
    fn on_message(&self, _body: &str) {}
}

/// A callback that forwards deliveries to a closure.
pub struct ForwardingCallback<F> {
    forward: F,
}

impl<F> ForwardingCallback<F>
where
    F: Fn(&str) + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(forward: F) -> Self {
        Self { forward }
    }
}

impl<F> DeliveryCallback for ForwardingCallback<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn on_message(&self, body: &str) {
        (self.forward)(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_sink_records_lines() {
        let sink = MemorySink::new();
        sink.write_line("Joined channel: general");
        sink.write_line("[general] [A] hi");

        assert_eq!(sink.lines().len(), 2);
        assert!(sink.contains("[A] hi"));
        assert_eq!(sink.count("general"), 2);
        assert!(!sink.contains("random"));
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_write() {
        let sink = Arc::new(MemorySink::new());
        let writer = Arc::clone(&sink);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.write_line("[general] [B] late");
        });

        assert!(sink.wait_for("[B] late", Duration::from_secs(5)).await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let sink = MemorySink::new();
        sink.write_line("something else");

        assert!(!sink.wait_for("never", Duration::from_millis(20)).await);
    }

    #[test]
    fn test_forwarding_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let target = Arc::clone(&seen);
        let callback = ForwardingCallback::new(move |body: &str| {
            target.lock().unwrap().push(body.to_string());
        });

        callback.on_message("[A] hi");
        NoopCallback.on_message("[A] ignored");

        assert_eq!(*seen.lock().unwrap(), vec!["[A] hi".to_string()]);
    }
}
