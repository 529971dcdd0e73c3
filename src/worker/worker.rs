// src/worker/worker.rs

//! The worker loop: reserve jobs from the serviced queues, dispatch them to
//! the matching scheduler or the task runtime, and settle the lease.
//!
//! A worker acks a job only after its signal was published; transient
//! failures nack with requeue until the attempt budget runs out, after which
//! the job is dead-lettered and a final `*-failed` signal is surfaced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dag::DagScheduler;
use crate::errors::{LightflowError, Result};
use crate::queue::{JobKind, JobPayload, JobQueue, JobRecord};
use crate::signal::{QueryReply, QueryRequest, Signal, SignalBody, SignalBus};
use crate::store::{DocumentStore, RunStoreHandle};
use crate::task::{run_task, TaskContext};
use crate::types::{LeaseToken, RunId, RunState, WorkerId};
use crate::workflow::{WorkflowRegistry, WorkflowScheduler};

const RESERVE_POLL_TIMEOUT: Duration = Duration::from_millis(500);
const RESERVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_JOB_ATTEMPTS: u32 = 3;

/// A worker process servicing a subset of the queues.
#[derive(Clone)]
pub struct Worker {
    id: WorkerId,
    queues: Vec<JobKind>,
    queue: Arc<dyn JobQueue>,
    bus: Arc<SignalBus>,
    store: Arc<dyn DocumentStore>,
    registry: Arc<WorkflowRegistry>,
    concurrency: usize,
    max_job_attempts: u32,
}

impl Worker {
    pub fn new(
        queues: Vec<JobKind>,
        queue: Arc<dyn JobQueue>,
        bus: Arc<SignalBus>,
        store: Arc<dyn DocumentStore>,
        registry: Arc<WorkflowRegistry>,
        concurrency: usize,
    ) -> Self {
        Self {
            id: WorkerId::new(),
            queues,
            queue,
            bus,
            store,
            registry,
            concurrency: concurrency.max(1),
            max_job_attempts: DEFAULT_MAX_JOB_ATTEMPTS,
        }
    }

    pub fn with_id(mut self, id: WorkerId) -> Self {
        self.id = id;
        self
    }

    pub fn with_max_job_attempts(mut self, attempts: u32) -> Self {
        self.max_job_attempts = attempts.max(1);
        self
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Main loop. Returns once a stop request arrives on the control channel
    /// and in-flight jobs have drained.
    pub async fn run(self) -> Result<()> {
        info!(worker = %self.id, queues = ?self.queues, concurrency = self.concurrency, "worker started");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let active: Arc<Mutex<HashMap<LeaseToken, String>>> = Arc::default();
        let mut control = self.bus.subscribe(RunId::control());
        let mut jobs = JoinSet::new();
        let mut shutting_down = false;

        while !shutting_down {
            // Reap finished job tasks so the set doesn't grow unbounded.
            while jobs.try_join_next().is_some() {}

            tokio::select! {
                maybe = control.recv() => {
                    match maybe {
                        Some(signal) => {
                            if self.handle_control(&signal, &active) {
                                shutting_down = true;
                            }
                        }
                        // The control channel is recreated lazily on the next
                        // publish; just re-attach.
                        None => control = self.bus.subscribe(RunId::control()),
                    }
                }
                reserved = self.reserve_next(&semaphore) => {
                    match reserved {
                        Ok(Some((record, lease, permit))) => {
                            let worker = self.clone();
                            let active = Arc::clone(&active);
                            jobs.spawn(async move {
                                let _permit: OwnedSemaphorePermit = permit;
                                worker.process_job(record, lease, active).await;
                            });
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(worker = %self.id, error = %err, "reserve failed; backing off");
                            tokio::time::sleep(RESERVE_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        info!(worker = %self.id, "worker stopping; draining in-flight jobs");
        while jobs.join_next().await.is_some() {}
        info!(worker = %self.id, "worker stopped");
        Ok(())
    }

    /// Wait for a concurrency slot, then poll the queues once.
    async fn reserve_next(
        &self,
        semaphore: &Arc<Semaphore>,
    ) -> Result<Option<(JobRecord, LeaseToken, OwnedSemaphorePermit)>> {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LightflowError::QueueUnavailable("worker semaphore closed".to_string()))?;

        match self
            .queue
            .reserve(&self.queues, &self.id, RESERVE_POLL_TIMEOUT)
            .await?
        {
            Some((record, lease)) => Ok(Some((record, lease, permit))),
            None => Ok(None),
        }
    }

    /// Handle a signal on the control channel. Returns true on a stop
    /// request addressed to workers.
    fn handle_control(
        &self,
        signal: &Signal,
        active: &Arc<Mutex<HashMap<LeaseToken, String>>>,
    ) -> bool {
        match &signal.body {
            SignalBody::StopRequest { dag: None } => {
                info!(worker = %self.id, "stop requested via control channel");
                true
            }
            SignalBody::Query(QueryRequest::WorkerStatus) => {
                let active_jobs: Vec<String> =
                    active.lock().unwrap().values().cloned().collect();
                self.bus.publish(signal.reply_to(QueryReply::WorkerStatus {
                    worker: self.id.to_string(),
                    queues: self.queues.clone(),
                    active_jobs,
                }));
                false
            }
            _ => false,
        }
    }

    async fn process_job(
        &self,
        record: JobRecord,
        lease: LeaseToken,
        active: Arc<Mutex<HashMap<LeaseToken, String>>>,
    ) {
        let describe = record.describe();
        debug!(worker = %self.id, job = %describe, attempt = record.attempt, "processing job");
        active.lock().unwrap().insert(lease, describe.clone());

        let result = self.dispatch(&record).await;
        active.lock().unwrap().remove(&lease);

        match result {
            Ok(()) => {
                if let Err(err) = self.queue.ack(lease).await {
                    // The lease may have expired mid-job; the broker will
                    // re-deliver and at-least-once semantics apply.
                    warn!(worker = %self.id, job = %describe, error = %err, "ack failed");
                }
            }
            Err(err) if err.is_recoverable() && record.attempt < self.max_job_attempts => {
                warn!(
                    worker = %self.id,
                    job = %describe,
                    attempt = record.attempt,
                    error = %err,
                    "transient job failure; re-queueing"
                );
                if let Err(nack_err) = self.queue.nack(lease, true).await {
                    warn!(worker = %self.id, job = %describe, error = %nack_err, "nack failed");
                }
            }
            Err(err) => {
                error!(
                    worker = %self.id,
                    job = %describe,
                    attempt = record.attempt,
                    error = %err,
                    "job failed permanently; dead-lettering"
                );
                self.publish_job_failure(&record, &err);
                if let Err(nack_err) = self.queue.nack(lease, false).await {
                    warn!(worker = %self.id, job = %describe, error = %nack_err, "nack failed");
                }
            }
        }
    }

    /// Route a reserved job to the matching component.
    async fn dispatch(&self, record: &JobRecord) -> Result<()> {
        match &record.payload {
            JobPayload::Workflow {
                workflow,
                args,
                keep_data,
            } => {
                let spec = self.registry.resolve(workflow)?;
                let scheduler = WorkflowScheduler::new(
                    Arc::clone(&self.queue),
                    Arc::clone(&self.bus),
                    Arc::clone(&self.store),
                );
                scheduler
                    .run(spec, record.run_id, args.clone(), *keep_data)
                    .await?;
                Ok(())
            }
            JobPayload::Dag {
                workflow,
                spec_dag,
                envelope,
            } => {
                let spec = self.registry.resolve(workflow)?;
                let dag_spec = spec.dags.get(spec_dag).cloned().ok_or_else(|| {
                    LightflowError::DagValidation {
                        dag: spec_dag.clone(),
                        reason: format!("not declared in workflow '{}'", workflow),
                    }
                })?;
                let instance = record
                    .dag_name
                    .clone()
                    .unwrap_or_else(|| spec_dag.clone());

                let scheduler =
                    DagScheduler::new(Arc::clone(&self.queue), Arc::clone(&self.bus));
                scheduler
                    .run(record.run_id, workflow, &instance, dag_spec, envelope.clone())
                    .await?;
                Ok(())
            }
            JobPayload::Task {
                workflow,
                spec_dag,
                envelope,
            } => {
                let spec = self.registry.resolve(workflow)?;
                let dag_spec = spec.dags.get(spec_dag).ok_or_else(|| {
                    LightflowError::DagValidation {
                        dag: spec_dag.clone(),
                        reason: format!("not declared in workflow '{}'", workflow),
                    }
                })?;
                let task_name = record.task_name.clone().ok_or_else(|| {
                    LightflowError::DataRouting("task job without a task name".to_string())
                })?;
                let node = dag_spec.tasks.get(&task_name).ok_or_else(|| {
                    LightflowError::DagValidation {
                        dag: spec_dag.clone(),
                        reason: format!("task '{}' not declared", task_name),
                    }
                })?;

                let context = TaskContext {
                    run_id: record.run_id,
                    workflow: workflow.clone(),
                    dag: record
                        .dag_name
                        .clone()
                        .unwrap_or_else(|| spec_dag.clone()),
                    task: task_name,
                    attempt: record.attempt,
                };
                let store = RunStoreHandle::new(Arc::clone(&self.store), record.run_id);
                run_task(node, context, envelope.clone(), store, Arc::clone(&self.bus)).await
            }
        }
    }

    /// Surface a permanently failed job as the matching `*-failed` signal.
    fn publish_job_failure(&self, record: &JobRecord, err: &LightflowError) {
        let kind = err.kind_tag().to_string();
        let body = match record.kind {
            JobKind::Task => SignalBody::TaskFailed {
                dag: record.dag_name.clone().unwrap_or_default(),
                task: record.task_name.clone().unwrap_or_default(),
                kind,
            },
            JobKind::Dag => SignalBody::DagFailed {
                dag: record.dag_name.clone().unwrap_or_default(),
                aborted: false,
                failed_task: None,
                failure_kind: Some(kind),
            },
            JobKind::Workflow => SignalBody::WorkflowCompleted {
                state: RunState::Failed,
            },
        };
        self.bus.publish(Signal::of(record.run_id, body));
    }
}
