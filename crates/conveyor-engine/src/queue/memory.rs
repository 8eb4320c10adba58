//! In-memory implementation of TaskQueue for testing
//!
//! Provides the same visibility and lease semantics as the PostgreSQL
//! implementation, including deferred delivery and redelivery after lease
//! expiry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{LeasedMessage, QueueError, TaskQueue};

struct Message {
    execution_id: Uuid,
    visible_at: DateTime<Utc>,
    lease_token: Option<Uuid>,
    leased_until: Option<DateTime<Utc>>,
}

impl Message {
    fn claimable(&self, now: DateTime<Utc>) -> bool {
        self.visible_at <= now && self.leased_until.map_or(true, |until| until <= now)
    }
}

/// In-memory implementation of TaskQueue
///
/// # Example
///
/// ```
/// use conveyor_engine::queue::InMemoryTaskQueue;
///
/// let queue = InMemoryTaskQueue::new();
/// ```
pub struct InMemoryTaskQueue {
    // Insertion order doubles as FIFO order among equal visibility times
    messages: Mutex<Vec<Message>>,
}

impl InMemoryTaskQueue {
    /// Create a new in-memory queue
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Total messages, leased or not
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Messages currently claimable
    pub fn visible_len(&self) -> usize {
        let now = Utc::now();
        self.messages
            .lock()
            .iter()
            .filter(|m| m.claimable(now))
            .count()
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(
        &self,
        execution_id: Uuid,
        deliver_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        self.messages.lock().push(Message {
            execution_id,
            visible_at: deliver_at.unwrap_or_else(Utc::now),
            lease_token: None,
            leased_until: None,
        });
        Ok(())
    }

    async fn dequeue(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<LeasedMessage>, QueueError> {
        let now = Utc::now();
        let mut messages = self.messages.lock();

        let candidate = messages
            .iter_mut()
            .filter(|m| m.claimable(now))
            .min_by_key(|m| m.visible_at);

        let Some(message) = candidate else {
            return Ok(None);
        };

        let token = Uuid::now_v7();
        message.lease_token = Some(token);
        message.leased_until =
            Some(now + chrono::Duration::from_std(visibility_timeout).unwrap_or_default());

        Ok(Some(LeasedMessage {
            execution_id: message.execution_id,
            lease_token: token,
        }))
    }

    async fn ack(&self, lease_token: Uuid) -> Result<(), QueueError> {
        let mut messages = self.messages.lock();
        let index = messages
            .iter()
            .position(|m| m.lease_token == Some(lease_token))
            .ok_or(QueueError::UnknownLease(lease_token))?;
        messages.remove(index);
        Ok(())
    }

    async fn extend(&self, lease_token: Uuid, extra: Duration) -> Result<(), QueueError> {
        let mut messages = self.messages.lock();
        let message = messages
            .iter_mut()
            .find(|m| m.lease_token == Some(lease_token))
            .ok_or(QueueError::UnknownLease(lease_token))?;

        let extra = chrono::Duration::from_std(extra).unwrap_or_default();
        message.leased_until = Some(message.leased_until.unwrap_or_else(Utc::now) + extra);
        Ok(())
    }
}
