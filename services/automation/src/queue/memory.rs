//! In-process queue with visibility timeouts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{MessageQueue, QueueError, QueueMessage};

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: Vec<u8>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    /// Receipt -> (message, visible again at).
    in_flight: HashMap<String, (StoredMessage, Instant)>,
}

impl QueueState {
    /// Moves expired in-flight messages back to the front of the queue.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, (_, visible_at))| *visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some((message, _)) = self.in_flight.remove(&receipt) {
                self.ready.push_front(message);
            }
        }
    }

    fn next_visibility(&self) -> Option<Instant> {
        self.in_flight.values().map(|(_, at)| *at).min()
    }
}

/// A [`MessageQueue`] held in memory, for tests and local runs.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    visibility_timeout: Duration,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility_timeout: Duration::from_secs(30),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    #[must_use]
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues a message and returns its id.
    pub fn send(&self, body: impl Into<Vec<u8>>) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.state().ready.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: body.into(),
            receive_count: 0,
        });
        self.notify.notify_one();
        message_id
    }

    /// Messages waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.state().ready.len()
    }

    /// Messages received but neither deleted nor expired.
    pub fn in_flight_len(&self) -> usize {
        self.state().in_flight.len()
    }

    /// True when every message has been deleted.
    pub fn is_drained(&self) -> bool {
        let state = self.state();
        state.ready.is_empty() && state.in_flight.is_empty()
    }

    fn take(&self, max_messages: usize) -> (Vec<QueueMessage>, Option<Instant>) {
        let now = Instant::now();
        let mut state = self.state();
        state.requeue_expired(now);

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut message) = state.ready.pop_front() else {
                break;
            };
            message.receive_count += 1;
            let receipt = Uuid::new_v4().to_string();
            batch.push(QueueMessage {
                message_id: message.message_id.clone(),
                receipt: receipt.clone(),
                body: message.body.clone(),
                receive_count: message.receive_count,
            });
            state
                .in_flight
                .insert(receipt, (message, now + self.visibility_timeout));
        }

        (batch, state.next_visibility())
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            let (batch, next_visibility) = self.take(max_messages.max(1));
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = next_visibility.map_or(deadline, |at| at.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, self.notify.notified()).await;
        }
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        // Deleting with a stale receipt is a no-op.
        self.state().in_flight.remove(receipt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_respects_max_messages() {
        let queue = MemoryQueue::new("events");
        for i in 0..5 {
            queue.send(format!("m{i}"));
        }

        let batch = queue.receive(3, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].body, b"m0");
        assert_eq!(queue.ready_len(), 2);
        assert_eq!(queue.in_flight_len(), 3);
    }

    #[tokio::test]
    async fn test_deleted_message_is_not_redelivered() {
        let queue = MemoryQueue::new("events").with_visibility_timeout(Duration::from_millis(10));
        queue.send("hello");

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        queue.delete(&batch[0].receipt).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());
        assert!(queue.is_drained());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undeleted_message_is_redelivered_after_visibility_timeout() {
        let queue = MemoryQueue::new("events").with_visibility_timeout(Duration::from_secs(30));
        let id = queue.send("hello");

        let first = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(first[0].receive_count, 1);
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());

        let second = queue.receive(10, Duration::from_secs(60)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, id);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].receipt, first[0].receipt);
    }

    #[tokio::test]
    async fn test_receive_wakes_on_send() {
        let queue = std::sync::Arc::new(MemoryQueue::new("events"));
        let receiver = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(1, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.send("late");

        let batch = receiver.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_empty() {
        let queue = MemoryQueue::new("events");
        let batch = queue.receive(10, Duration::from_secs(20)).await.unwrap();
        assert!(batch.is_empty());
    }
}
