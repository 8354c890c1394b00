//! Message consumer task.
//!
//! One task runs per active subscription queue. It waits on the queue's
//! delivery stream and hands each message to the session's sink and
//! callback, independently of whatever the session's owner is doing.

use crate::channel::ChannelId;
use crate::message::{decode_body, render_inbound};
use crate::metrics;
use crate::sink::{DeliveryCallback, OutputSink};
use chatter_transport::{Deliveries, QueueName};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Handle to a running consumer task.
///
/// Dropping the handle aborts the task.
#[derive(Debug)]
pub struct ConsumerHandle {
    channel: ChannelId,
    queue: QueueName,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Spawn a consumer for `deliveries`.
    ///
    /// Every delivery is rendered under `channel`, the channel the queue was
    /// bound to when the consumer started.
    pub fn spawn(
        channel: impl Into<ChannelId>,
        deliveries: Deliveries,
        sink: Arc<dyn OutputSink>,
        callback: Arc<dyn DeliveryCallback>,
    ) -> Self {
        let channel = channel.into();
        let queue = deliveries.queue().to_string();
        let task = tokio::spawn(run(channel.clone(), deliveries, sink, callback));

        debug!(channel = %channel, queue = %queue, "Consumer started");
        Self {
            channel,
            queue,
            task,
        }
    }

    /// Channel the consumer labels deliveries with.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Queue the consumer reads from.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Check if the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task. A delivery already handed to the sink is not undone.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    channel: ChannelId,
    mut deliveries: Deliveries,
    sink: Arc<dyn OutputSink>,
    callback: Arc<dyn DeliveryCallback>,
) {
    while let Some(delivery) = deliveries.next().await {
        match delivery {
            Ok(body) => {
                let body = decode_body(&body);
                trace!(channel = %channel, bytes = body.len(), "Delivery");
                sink.write_line(&render_inbound(&channel, &body));
                callback.on_message(&body);
                metrics::record_delivered();
            }
            Err(e) => {
                warn!(channel = %channel, queue = %deliveries.queue(), error = %e, "Delivery stream failed");
                sink.write_line(&format!("Error consuming messages: {e}"));
                metrics::record_error("consume", e.kind());
                break;
            }
        }
    }

    debug!(channel = %channel, queue = %deliveries.queue(), "Consumer stopped");
}
