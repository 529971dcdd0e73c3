// src/queue/broker.rs

//! In-process broker implementation of the job queue.
//!
//! Backs the embedded engine and the test suite. Reserved jobs are tracked
//! as leases with a deadline; a lease that is neither acked nor nacked in
//! time is re-queued, which is what gives crashed workers their
//! at-least-once semantics.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{LightflowError, Result};
use crate::queue::{JobKind, JobQueue, JobRecord};
use crate::types::{JobId, LeaseToken, WorkerId};

use async_trait::async_trait;

const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

/// Granularity at which a blocked `reserve` re-checks for expired leases.
const RESERVE_TICK: Duration = Duration::from_millis(100);

struct Lease {
    job_id: JobId,
    kind: JobKind,
    record: JobRecord,
    worker: WorkerId,
    expires_at: Instant,
}

#[derive(Default)]
struct BrokerInner {
    queues: HashMap<JobKind, VecDeque<(JobId, JobRecord)>>,
    leases: HashMap<LeaseToken, Lease>,
    dead_letter: Vec<JobRecord>,
}

impl BrokerInner {
    /// Move expired leases back onto their queues.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseToken> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(token, _)| *token)
            .collect();

        for token in &expired {
            if let Some(lease) = self.leases.remove(token) {
                warn!(
                    job = %lease.record.describe(),
                    worker = %lease.worker,
                    "lease expired; re-queueing job"
                );
                let mut record = lease.record;
                record.attempt += 1;
                self.queues
                    .entry(lease.kind)
                    .or_default()
                    .push_back((lease.job_id, record));
            }
        }
    }

    fn pop_matching(&mut self, queues: &[JobKind]) -> Option<(JobId, JobRecord)> {
        for kind in queues {
            if let Some(queue) = self.queues.get_mut(kind) {
                if let Some(entry) = queue.pop_front() {
                    return Some(entry);
                }
            }
        }
        None
    }
}

pub struct MemoryBroker {
    inner: Mutex<BrokerInner>,
    notify: Notify,
    lease_ttl: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_lease_ttl(DEFAULT_LEASE_TTL)
    }

    /// A broker whose leases expire after `lease_ttl`. Short TTLs are used in
    /// tests to exercise redelivery after a worker crash.
    pub fn with_lease_ttl(lease_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(BrokerInner::default()),
            notify: Notify::new(),
            lease_ttl,
        }
    }

    /// Jobs that were nacked without requeue.
    pub fn dead_letters(&self) -> Vec<JobRecord> {
        self.inner.lock().unwrap().dead_letter.clone()
    }

    /// Number of jobs currently visible on the given queue.
    pub fn queue_depth(&self, kind: JobKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .queues
            .get(&kind)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl JobQueue for MemoryBroker {
    async fn submit(&self, record: JobRecord) -> Result<JobId> {
        let job_id = JobId::new();
        let kind = record.kind;

        {
            let mut inner = self.inner.lock().unwrap();
            inner.queues.entry(kind).or_default().push_back((job_id, record));
        }

        debug!(job_id = %job_id, queue = %kind, "job submitted");
        self.notify.notify_waiters();
        Ok(job_id)
    }

    async fn reserve(
        &self,
        queues: &[JobKind],
        worker_id: &WorkerId,
        poll_timeout: Duration,
    ) -> Result<Option<(JobRecord, LeaseToken)>> {
        let deadline = Instant::now() + poll_timeout;

        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                inner.requeue_expired(Instant::now());

                if let Some((job_id, record)) = inner.pop_matching(queues) {
                    let token = LeaseToken::new();
                    inner.leases.insert(
                        token,
                        Lease {
                            job_id,
                            kind: record.kind,
                            record: record.clone(),
                            worker: worker_id.clone(),
                            expires_at: Instant::now() + self.lease_ttl,
                        },
                    );
                    debug!(
                        job = %record.describe(),
                        worker = %worker_id,
                        attempt = record.attempt,
                        "job reserved"
                    );
                    return Ok(Some((record, token)));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            // Wake up on a new submission, or tick so expired leases are
            // noticed even when nothing is submitted.
            let tick = RESERVE_TICK.min(deadline - now);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }

    async fn ack(&self, lease: LeaseToken) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.leases.remove(&lease) {
            Some(held) => {
                debug!(job = %held.record.describe(), "job acked");
                Ok(())
            }
            None => Err(LightflowError::QueueUnavailable(format!(
                "lease {} unknown or expired",
                lease
            ))),
        }
    }

    async fn nack(&self, lease: LeaseToken, requeue: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let held = inner.leases.remove(&lease).ok_or_else(|| {
            LightflowError::QueueUnavailable(format!("lease {} unknown or expired", lease))
        })?;

        if requeue {
            let mut record = held.record;
            record.attempt += 1;
            debug!(job = %record.describe(), attempt = record.attempt, "job nacked; re-queueing");
            inner
                .queues
                .entry(held.kind)
                .or_default()
                .push_back((held.job_id, record));
            drop(inner);
            self.notify.notify_waiters();
        } else {
            warn!(job = %held.record.describe(), "job nacked without requeue; dead-lettering");
            inner.dead_letter.push(held.record);
        }

        Ok(())
    }
}
