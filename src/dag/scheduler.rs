// src/dag/scheduler.rs

//! Async shell driving one DAG run.
//!
//! The scheduler dispatches ready tasks as jobs on the `task` queue and then
//! blocks on the signal bus, never on the job queue: completions, failures,
//! skips and stop/abort requests all arrive as signals. The pure state
//! machine in [`crate::dag::state`] decides what to do with them.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::dag::spec::DagSpec;
use crate::dag::state::{DagOutcome, DagRunState};
use crate::data::DataEnvelope;
use crate::errors::Result;
use crate::queue::{JobQueue, JobRecord};
use crate::signal::{Signal, SignalBody, SignalBus};
use crate::types::RunId;

pub struct DagScheduler {
    queue: Arc<dyn JobQueue>,
    bus: Arc<SignalBus>,
}

impl DagScheduler {
    pub fn new(queue: Arc<dyn JobQueue>, bus: Arc<SignalBus>) -> Self {
        Self { queue, bus }
    }

    /// Run one DAG to its terminal outcome.
    ///
    /// `instance` is the name this DAG run publishes under; it differs from
    /// `spec.name` when the same blueprint is started several times in one
    /// run.
    pub async fn run(
        &self,
        run_id: RunId,
        workflow: &str,
        instance: &str,
        spec: DagSpec,
        initial: Option<DataEnvelope>,
    ) -> Result<DagOutcome> {
        if let Err(err) = spec.validate() {
            error!(run_id = %run_id, dag = %instance, error = %err, "DAG failed validation");
            self.bus.publish(Signal::of(
                run_id,
                SignalBody::DagFailed {
                    dag: instance.to_string(),
                    aborted: false,
                    failed_task: None,
                    failure_kind: Some(err.kind_tag().to_string()),
                },
            ));
            return Ok(DagOutcome::Failed { aborted: false });
        }

        info!(run_id = %run_id, dag = %instance, "DAG run starting");

        // Subscribe before the first dispatch so no completion slips past.
        let mut signals = self.bus.subscribe(run_id);
        let mut state = DagRunState::new(instance, spec, initial);

        self.flush(run_id, workflow, &mut state).await?;

        let outcome = loop {
            if let Some(outcome) = state.poll_outcome() {
                break outcome;
            }

            let Some(signal) = signals.recv().await else {
                warn!(run_id = %run_id, dag = %instance, "signal channel closed mid-run; aborting DAG");
                state.abort();
                continue;
            };

            self.apply_signal(&mut state, instance, signal);
            self.flush(run_id, workflow, &mut state).await?;
        };

        // Sweeps triggered by the final poll may still have skips to report.
        self.publish_skips(run_id, &mut state);
        self.publish_outcome(run_id, &state, outcome);
        Ok(outcome)
    }

    fn apply_signal(&self, state: &mut DagRunState, instance: &str, signal: Signal) {
        let run_id = signal.run_id;
        match signal.body {
            SignalBody::TaskCompleted {
                dag,
                task,
                envelope,
                routing,
                stop_dag,
            } if dag == instance => {
                debug!(run_id = %run_id, dag = %instance, task = %task, "task completed");
                state.on_completed(&task, envelope, &routing, stop_dag);
            }
            SignalBody::TaskFailed { dag, task, kind } if dag == instance => {
                let was_stopping = state.is_stopping();
                state.on_failed(&task, &kind);
                // Strict policy cancels outstanding work: make the stop
                // visible to in-flight tasks polling their signal handle.
                if state.is_stopping() && !was_stopping {
                    self.bus.publish(Signal::of(
                        run_id,
                        SignalBody::StopRequest {
                            dag: Some(instance.to_string()),
                        },
                    ));
                }
            }
            SignalBody::TaskSkipped { dag, task } if dag == instance => {
                state.on_skipped(&task);
            }
            SignalBody::StopRequest { dag } => match dag {
                None => state.request_stop(),
                Some(d) if d == instance => state.request_stop(),
                Some(_) => {}
            },
            SignalBody::AbortRequest => state.abort(),
            _ => {}
        }
    }

    /// Dispatch everything that became ready and publish pending skips.
    async fn flush(
        &self,
        run_id: RunId,
        workflow: &str,
        state: &mut DagRunState,
    ) -> Result<()> {
        self.publish_skips(run_id, state);

        for (task, envelope) in state.take_ready() {
            let record = JobRecord::task(
                run_id,
                workflow,
                state.spec().name.clone(),
                state.dag_name(),
                task.clone(),
                envelope,
            );
            self.queue.submit(record).await.map_err(|err| {
                error!(
                    run_id = %run_id,
                    dag = state.dag_name(),
                    task = %task,
                    error = %err,
                    "failed to submit task job"
                );
                err
            })?;
        }

        Ok(())
    }

    fn publish_skips(&self, run_id: RunId, state: &mut DagRunState) {
        for task in state.drain_skipped() {
            self.bus.publish(Signal::of(
                run_id,
                SignalBody::TaskSkipped {
                    dag: state.dag_name().to_string(),
                    task,
                },
            ));
        }
    }

    fn publish_outcome(&self, run_id: RunId, state: &DagRunState, outcome: DagOutcome) {
        let dag = state.dag_name().to_string();
        let signal = match outcome {
            DagOutcome::Completed { stopped } => {
                info!(run_id = %run_id, dag = %dag, stopped, "DAG completed");
                SignalBody::DagCompleted { dag, stopped }
            }
            DagOutcome::Failed { aborted } => {
                let (failed_task, failure_kind) = match state.first_failure() {
                    Some((task, kind)) => (Some(task.clone()), Some(kind.clone())),
                    None => (None, None),
                };
                warn!(run_id = %run_id, dag = %dag, aborted, "DAG failed");
                SignalBody::DagFailed {
                    dag,
                    aborted,
                    failed_task,
                    failure_kind,
                }
            }
        };
        self.bus.publish(Signal::of(run_id, signal));
    }
}
