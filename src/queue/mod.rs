// src/queue/mod.rs

pub mod broker;
pub mod job;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::{JobId, LeaseToken, WorkerId};

pub use broker::MemoryBroker;
pub use job::{JobKind, JobPayload, JobRecord};

/// The broker-backed job queue.
///
/// Three logical streams (`workflow`, `dag`, `task`) are multiplexed over
/// named queues. Delivery is at-least-once: a reserved job stays invisible
/// until acked, nacked or its lease expires, at which point it becomes
/// visible to another consumer. FIFO order is not guaranteed.
///
/// The concrete broker client is an external collaborator; the engine only
/// relies on this interface.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Durably append a job record to its queue.
    async fn submit(&self, record: JobRecord) -> Result<JobId>;

    /// Pull the next record matching any of the listed queues.
    ///
    /// Returns `None` when no matching job became available within
    /// `poll_timeout`.
    async fn reserve(
        &self,
        queues: &[JobKind],
        worker_id: &WorkerId,
        poll_timeout: Duration,
    ) -> Result<Option<(JobRecord, LeaseToken)>>;

    /// Acknowledge a reserved job; the broker drops it.
    async fn ack(&self, lease: LeaseToken) -> Result<()>;

    /// Give a reserved job back. With `requeue` the job becomes visible to
    /// another consumer with its attempt counter bumped; without, it is
    /// routed to the dead-letter queue.
    async fn nack(&self, lease: LeaseToken, requeue: bool) -> Result<()>;
}
