//! Queue consumer loop.
//!
//! The consumer long-polls one queue and, for every message:
//! 1. Decodes the body into an [`EventEnvelope`]
//! 2. Looks up the handler registered for its event type
//! 3. Invokes the handler
//! 4. Deletes the message
//!
//! Step 4 runs whatever the outcome of steps 1-3: a message that cannot be
//! decoded or routed will never succeed, and a handler failure is logged with
//! the message id instead of being retried. A message is only redelivered if
//! the consumer stops (or the delete fails) before step 4.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cdp_events::{EventEnvelope, DEFAULT_MAX_PAYLOAD_BYTES};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::{MessageQueue, QueueMessage};
use crate::handlers::{HandlerContext, HandlerRegistry};

/// Configuration for a queue consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum number of messages to receive per poll.
    pub max_messages: usize,

    /// How long a poll waits for the first message.
    pub wait_time: Duration,

    /// Pause after a failed receive before polling again.
    pub error_backoff: Duration,

    /// Largest decompressed event payload; bigger messages are dropped.
    pub max_payload_bytes: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(20),
            error_backoff: Duration::from_secs(1),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// How a single message was disposed of. Every outcome deletes the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Handled,
    /// The handler returned an error.
    Failed,
    /// The body is not a valid event envelope.
    DecodeError,
    /// No handler is registered for the event type.
    Unrouted,
}

/// Running totals for one consumer.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    decode_errors: AtomicU64,
    unrouted: AtomicU64,
}

impl ConsumerStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn unrouted(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: MessageOutcome) {
        let counter = match outcome {
            MessageOutcome::Handled => &self.handled,
            MessageOutcome::Failed => &self.failed,
            MessageOutcome::DecodeError => &self.decode_errors,
            MessageOutcome::Unrouted => &self.unrouted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Consumes one queue, dispatching messages through a shared registry.
pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    registry: Arc<HandlerRegistry>,
    config: ConsumerConfig,
    stats: ConsumerStats,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        registry: Arc<HandlerRegistry>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
            stats: ConsumerStats::default(),
        }
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Run the consumer until the shutdown signal is received.
    ///
    /// A handler still running when shutdown arrives is dropped and its
    /// message left undeleted, to be redelivered after the visibility timeout.
    #[instrument(skip(self, shutdown), fields(queue = %self.queue.name()), name = "queue_consumer")]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_messages = self.config.max_messages,
            wait_secs = self.config.wait_time.as_secs(),
            "Starting queue consumer"
        );

        'poll: loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                received = self.queue.receive(self.config.max_messages, self.config.wait_time) => received,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    error!(error = %e, "Failed to receive messages");
                    tokio::select! {
                        _ = shutdown_signalled(&mut shutdown) => break,
                        _ = sleep(self.config.error_backoff) => {}
                    }
                    continue;
                }
            };

            if messages.is_empty() {
                continue;
            }
            debug!(count = messages.len(), "Received message batch");

            for message in messages {
                tokio::select! {
                    biased;
                    _ = shutdown_signalled(&mut shutdown) => {
                        warn!(
                            message_id = %message.message_id,
                            "Shutdown during handling, message left for redelivery"
                        );
                        break 'poll;
                    }
                    _ = self.process_message(&message) => {}
                }
            }
        }

        info!(
            received = self.stats.received(),
            handled = self.stats.handled(),
            failed = self.stats.failed(),
            decode_errors = self.stats.decode_errors(),
            unrouted = self.stats.unrouted(),
            "Queue consumer stopped"
        );
    }

    /// Decodes, dispatches and deletes one message.
    pub async fn process_message(&self, message: &QueueMessage) -> MessageOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let outcome = self.dispatch(message).await;
        self.stats.record(outcome);

        if let Err(e) = self.queue.delete(&message.receipt).await {
            error!(
                message_id = %message.message_id,
                error = %e,
                "Failed to delete message, it will be redelivered"
            );
        }

        outcome
    }

    async fn dispatch(&self, message: &QueueMessage) -> MessageOutcome {
        let event = match EventEnvelope::decode_with_limit(
            &message.body,
            self.config.max_payload_bytes,
        ) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Dropping undecodable message"
                );
                return MessageOutcome::DecodeError;
            }
        };

        let Some(handler) = self.registry.handler_for(&event.event_type) else {
            warn!(
                message_id = %message.message_id,
                event_type = %event.event_type,
                "No handler registered for event type"
            );
            return MessageOutcome::Unrouted;
        };

        let ctx = HandlerContext {
            message_id: message.message_id.clone(),
            queue: self.queue.name().to_string(),
            receive_count: message.receive_count,
        };

        match handler.handle(&event, &ctx).await {
            Ok(()) => {
                debug!(
                    message_id = %message.message_id,
                    event_type = %event.event_type,
                    handler = handler.name(),
                    "Message handled"
                );
                MessageOutcome::Handled
            }
            Err(e) => {
                error!(
                    message_id = %message.message_id,
                    event_type = %event.event_type,
                    handler = handler.name(),
                    receive_count = ctx.receive_count,
                    redelivery = ctx.is_redelivery(),
                    error = %e,
                    "Handler failed"
                );
                MessageOutcome::Failed
            }
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{EventHandler, HandlerError, HandlerResult};
    use crate::queue::MemoryQueue;
    use async_trait::async_trait;
    use chrono::Utc;

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &["x.failed"]
        }

        async fn handle(&self, _: &EventEnvelope, _: &HandlerContext) -> HandlerResult<()> {
            Err(HandlerError::Partial {
                failed: 1,
                total: 1,
            })
        }
    }

    fn consumer(queue: Arc<MemoryQueue>) -> QueueConsumer {
        let registry =
            HandlerRegistry::from_handlers([Arc::new(Failing) as Arc<dyn EventHandler>]).unwrap();
        QueueConsumer::new(queue, Arc::new(registry), ConsumerConfig::default())
    }

    async fn receive_one(queue: &MemoryQueue) -> QueueMessage {
        queue
            .receive(1, Duration::ZERO)
            .await
            .unwrap()
            .pop()
            .unwrap()
    }

    #[rstest::rstest]
    #[case::not_json(b"not json".to_vec(), MessageOutcome::DecodeError)]
    #[case::missing_timestamp(br#"{"eventType":"x.failed","payload":{}}"#.to_vec(), MessageOutcome::DecodeError)]
    #[case::unknown_type(
        EventEnvelope::new("x.unknown", Utc::now(), serde_json::json!({})).encode().unwrap(),
        MessageOutcome::Unrouted
    )]
    #[case::handler_error(
        EventEnvelope::new("x.failed", Utc::now(), serde_json::json!({})).encode().unwrap(),
        MessageOutcome::Failed
    )]
    #[tokio::test]
    async fn test_every_outcome_deletes_message(
        #[case] body: Vec<u8>,
        #[case] expected: MessageOutcome,
    ) {
        let queue = Arc::new(MemoryQueue::new("events"));
        let consumer = consumer(queue.clone());
        queue.send(body);

        let message = receive_one(&queue).await;
        assert_eq!(consumer.process_message(&message).await, expected);
        assert!(queue.is_drained());
        assert_eq!(consumer.stats().received(), 1);
    }

    #[tokio::test]
    async fn test_oversized_compressed_payload_is_dropped() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let payload = format!(r#"{{"padding": "{}"}}"#, "a".repeat(4096));
        encoder.write_all(payload.as_bytes()).unwrap();
        let body = serde_json::to_vec(&serde_json::json!({
            "event_type": "x.failed",
            "timestamp": "2025-01-01T10:00:00Z",
            "compression": "gzip",
            "payload": STANDARD.encode(encoder.finish().unwrap()),
        }))
        .unwrap();

        let queue = Arc::new(MemoryQueue::new("events"));
        let registry =
            HandlerRegistry::from_handlers([Arc::new(Failing) as Arc<dyn EventHandler>]).unwrap();
        let consumer = QueueConsumer::new(
            queue.clone(),
            Arc::new(registry),
            ConsumerConfig {
                max_payload_bytes: 1024,
                ..ConsumerConfig::default()
            },
        );
        queue.send(body.clone());
        let message = receive_one(&queue).await;
        assert_eq!(
            consumer.process_message(&message).await,
            MessageOutcome::DecodeError
        );

        // The same message routes normally under the default limit.
        let consumer = self::consumer(queue.clone());
        queue.send(body);
        let message = receive_one(&queue).await;
        assert_eq!(consumer.process_message(&message).await, MessageOutcome::Failed);
        assert!(queue.is_drained());
    }
}
