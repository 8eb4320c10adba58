//! Task queue contract
//!
//! Delivers execution ids to workers with at-least-once semantics, FIFO by
//! visibility time, deferred delivery and lease-based redelivery. The
//! engine never depends on exactly-once: a duplicate delivery observes a
//! non-admissible execution state and no-ops.

mod memory;
mod postgres;

pub use memory::InMemoryTaskQueue;
pub use postgres::PostgresTaskQueue;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Lease token unknown or already surrendered
    #[error("unknown lease: {0}")]
    UnknownLease(Uuid),

    /// Queue infrastructure fault
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// A message held under a visibility lease
///
/// If the lease expires before [`TaskQueue::ack`], the message becomes
/// visible again and another worker may claim it.
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    pub execution_id: Uuid,
    pub lease_token: Uuid,
}

/// Queue of execution ids awaiting a worker
#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    /// Enqueue an execution id, optionally invisible until `deliver_at`
    async fn enqueue(
        &self,
        execution_id: Uuid,
        deliver_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError>;

    /// Claim the oldest visible message under a lease of `visibility_timeout`
    ///
    /// Returns `None` when nothing is currently visible.
    async fn dequeue(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<LeasedMessage>, QueueError>;

    /// Acknowledge and remove a leased message
    async fn ack(&self, lease_token: Uuid) -> Result<(), QueueError>;

    /// Push the lease deadline out by `extra`
    async fn extend(&self, lease_token: Uuid, extra: Duration) -> Result<(), QueueError>;
}
