//! Message queue abstraction and the consumer loop.
//!
//! A queue delivers each message at least once. Received messages stay
//! invisible for a visibility timeout; a message not deleted before it
//! expires is delivered again.

mod consumer;
pub mod memory;

pub use consumer::{ConsumerConfig, ConsumerStats, MessageOutcome, QueueConsumer};
pub use memory::MemoryQueue;
pub(crate) use consumer::shutdown_signalled;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::DbError;

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Handle for deleting this delivery; changes on every receive.
    pub receipt: String,
    pub body: Vec<u8>,
    /// Number of times the message has been received, this delivery included.
    pub receive_count: u32,
}

/// Queue transport errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(#[from] DbError),
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue name, used in logs.
    fn name(&self) -> &str;

    /// Receives up to `max_messages`, waiting at most `wait` for the first one.
    ///
    /// Returns an empty batch when nothing arrived in time.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Deletes a delivered message so it is not redelivered.
    async fn delete(&self, receipt: &str) -> Result<(), QueueError>;
}
