// src/workflow/scheduler.rs

//! Async loop managing one workflow run.
//!
//! The workflow scheduler creates the run document, enqueues one DAG job per
//! autostart DAG, and then serves the run's signal channel: it starts DAGs
//! requested at runtime, answers queries, applies stop/abort requests and
//! finalises the run once the set of live DAGs drains.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::data::DataEnvelope;
use crate::errors::Result;
use crate::queue::{JobQueue, JobRecord};
use crate::signal::{QueryReply, QueryRequest, Signal, SignalBody, SignalBus};
use crate::store::{DocumentStore, Section};
use crate::types::{RunId, RunState};
use crate::workflow::spec::WorkflowSpec;

pub struct WorkflowScheduler {
    queue: Arc<dyn JobQueue>,
    bus: Arc<SignalBus>,
    store: Arc<dyn DocumentStore>,
}

/// Mutable state of one workflow run while its scheduler is live.
struct RunTracker {
    live: BTreeSet<String>,
    instance_counts: HashMap<String, usize>,
    /// Join queries waiting for a set of instances to drain.
    pending_joins: Vec<(Signal, BTreeSet<String>)>,
    /// DAG instances with a scoped stop request.
    dag_stops: HashSet<String>,
    stopping: bool,
    stop_requested: bool,
    aborted: bool,
    any_failed: bool,
    first_failure: Option<(String, String, String)>,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            live: BTreeSet::new(),
            instance_counts: HashMap::new(),
            pending_joins: Vec::new(),
            dag_stops: HashSet::new(),
            stopping: false,
            stop_requested: false,
            aborted: false,
            any_failed: false,
            first_failure: None,
        }
    }

    /// Unique instance name for a DAG blueprint within this run.
    fn instance_name(&mut self, dag: &str) -> String {
        let count = self.instance_counts.entry(dag.to_string()).or_insert(0);
        let name = if *count == 0 {
            dag.to_string()
        } else {
            format!("{}-{}", dag, count)
        };
        *count += 1;
        name
    }

    fn current_state(&self) -> RunState {
        if self.stopping {
            RunState::Stopping
        } else {
            RunState::Running
        }
    }

    fn final_state(&self) -> RunState {
        if self.aborted {
            RunState::Aborted
        } else if self.any_failed {
            RunState::Failed
        } else if self.stop_requested {
            RunState::Stopped
        } else {
            RunState::Succeeded
        }
    }
}

impl WorkflowScheduler {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        bus: Arc<SignalBus>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self { queue, bus, store }
    }

    /// Run a workflow to its terminal state.
    pub async fn run(
        &self,
        spec: &WorkflowSpec,
        run_id: RunId,
        args: BTreeMap<String, Value>,
        keep_data: bool,
    ) -> Result<RunState> {
        info!(run_id = %run_id, workflow = %spec.name, "workflow run starting");

        // Invalid graphs are rejected here, before any task can run.
        if let Err(err) = spec.validate() {
            error!(run_id = %run_id, workflow = %spec.name, error = %err, "workflow failed validation");
            self.bus.publish(Signal::of(
                run_id,
                SignalBody::WorkflowCompleted {
                    state: RunState::Failed,
                },
            ));
            self.bus.close_run(run_id);
            return Ok(RunState::Failed);
        }

        self.store.create_doc(run_id).await?;
        self.write_meta(run_id, spec, &args).await?;

        // Subscribe before enqueueing so no completion slips past.
        let mut signals = self.bus.subscribe(run_id);
        let mut tracker = RunTracker::new();

        for dag in spec.autostart_dags() {
            let instance = tracker.instance_name(dag);
            self.enqueue_dag(run_id, spec, dag, &instance, None).await?;
            tracker.live.insert(instance);
        }

        while !tracker.live.is_empty() {
            let Some(signal) = signals.recv().await else {
                warn!(run_id = %run_id, "signal channel closed mid-run; aborting workflow");
                tracker.aborted = true;
                break;
            };
            self.apply_signal(run_id, spec, &mut tracker, signal).await?;
        }

        self.finalize(run_id, spec, tracker, keep_data).await
    }

    async fn apply_signal(
        &self,
        run_id: RunId,
        spec: &WorkflowSpec,
        tracker: &mut RunTracker,
        signal: Signal,
    ) -> Result<()> {
        match &signal.body {
            SignalBody::RunDag { dag, envelope } => {
                self.handle_run_dag(run_id, spec, tracker, &signal, dag, envelope.clone())
                    .await?;
            }
            SignalBody::DagCompleted { dag, stopped } => {
                debug!(run_id = %run_id, dag = %dag, stopped, "DAG finished");
                tracker.live.remove(dag);
                self.settle_joins(tracker, dag);
            }
            SignalBody::DagFailed {
                dag,
                aborted,
                failed_task,
                failure_kind,
            } => {
                tracker.live.remove(dag);
                tracker.any_failed = true;
                if *aborted {
                    tracker.aborted = true;
                }
                if tracker.first_failure.is_none() {
                    tracker.first_failure = Some((
                        dag.clone(),
                        failed_task.clone().unwrap_or_default(),
                        failure_kind.clone().unwrap_or_default(),
                    ));
                }

                // Strict policy: pull the plug on the remaining DAGs.
                if spec.stop_on_dag_failure && !tracker.stopping && !tracker.live.is_empty() {
                    warn!(
                        run_id = %run_id,
                        dag = %dag,
                        "DAG failed; broadcasting stop to remaining DAGs"
                    );
                    tracker.stopping = true;
                    self.bus
                        .publish(Signal::of(run_id, SignalBody::StopRequest { dag: None }));
                }
                self.settle_joins(tracker, dag);
            }
            SignalBody::StopRequest { dag: None } => {
                info!(run_id = %run_id, "workflow stop requested; draining live DAGs");
                tracker.stopping = true;
                tracker.stop_requested = true;
            }
            SignalBody::StopRequest { dag: Some(dag) } => {
                tracker.dag_stops.insert(dag.clone());
            }
            SignalBody::AbortRequest => {
                warn!(run_id = %run_id, "workflow abort requested");
                tracker.stopping = true;
                tracker.aborted = true;
            }
            SignalBody::Query(query) => self.handle_query(tracker, &signal, query),
            _ => {}
        }
        Ok(())
    }

    async fn handle_run_dag(
        &self,
        run_id: RunId,
        spec: &WorkflowSpec,
        tracker: &mut RunTracker,
        signal: &Signal,
        dag: &str,
        envelope: Option<DataEnvelope>,
    ) -> Result<()> {
        if tracker.stopping {
            self.bus.publish(signal.reply_to(QueryReply::Error {
                message: format!("run is stopping; not starting DAG '{}'", dag),
            }));
            return Ok(());
        }

        if !spec.dags.contains_key(dag) {
            warn!(run_id = %run_id, dag = %dag, "run-dag request for unknown DAG");
            self.bus.publish(signal.reply_to(QueryReply::Error {
                message: format!("workflow '{}' has no DAG '{}'", spec.name, dag),
            }));
            return Ok(());
        }

        let instance = tracker.instance_name(dag);
        self.enqueue_dag(run_id, spec, dag, &instance, envelope).await?;
        tracker.live.insert(instance.clone());
        debug!(run_id = %run_id, dag = %dag, instance = %instance, "started DAG on request");
        self.bus
            .publish(signal.reply_to(QueryReply::DagStarted { dag: instance }));
        Ok(())
    }

    fn handle_query(&self, tracker: &mut RunTracker, signal: &Signal, query: &QueryRequest) {
        match query {
            QueryRequest::JoinDags { dags, asking_dag } => {
                let targets: BTreeSet<String> = match dags {
                    Some(names) => names
                        .iter()
                        .filter(|n| tracker.live.contains(*n))
                        .cloned()
                        .collect(),
                    None => tracker
                        .live
                        .iter()
                        .filter(|n| *n != asking_dag)
                        .cloned()
                        .collect(),
                };

                if targets.is_empty() {
                    self.bus.publish(signal.reply_to(QueryReply::DagsJoined));
                } else {
                    tracker.pending_joins.push((signal.clone(), targets));
                }
            }
            QueryRequest::IsStopRequested { dag } => {
                let stopped = tracker.stopping || tracker.dag_stops.contains(dag);
                self.bus
                    .publish(signal.reply_to(QueryReply::StopRequested { stopped }));
            }
            QueryRequest::WorkflowStatus => {
                self.bus.publish(signal.reply_to(QueryReply::WorkflowStatus {
                    state: tracker.current_state(),
                    live_dags: tracker.live.iter().cloned().collect(),
                }));
            }
            // Answered by workers on the control channel.
            QueryRequest::WorkerStatus => {}
        }
    }

    /// Release join queries whose target set drained.
    fn settle_joins(&self, tracker: &mut RunTracker, finished: &str) {
        let mut kept = Vec::new();
        for (signal, mut targets) in tracker.pending_joins.drain(..) {
            targets.remove(finished);
            if targets.is_empty() {
                self.bus.publish(signal.reply_to(QueryReply::DagsJoined));
            } else {
                kept.push((signal, targets));
            }
        }
        tracker.pending_joins = kept;
    }

    async fn enqueue_dag(
        &self,
        run_id: RunId,
        spec: &WorkflowSpec,
        dag: &str,
        instance: &str,
        envelope: Option<DataEnvelope>,
    ) -> Result<()> {
        let record = JobRecord::dag(run_id, spec.name.clone(), dag, instance, envelope);
        self.queue.submit(record).await?;
        Ok(())
    }

    async fn write_meta(
        &self,
        run_id: RunId,
        spec: &WorkflowSpec,
        args: &BTreeMap<String, Value>,
    ) -> Result<()> {
        self.store
            .set(run_id, &Section::Meta, "name", json!(spec.name))
            .await?;
        self.store
            .set(run_id, &Section::Meta, "start_time", json!(Utc::now()))
            .await?;
        self.store
            .set(run_id, &Section::Meta, "state", json!(RunState::Running))
            .await?;
        self.store
            .set(run_id, &Section::Workflow, "args", json!(args))
            .await?;
        Ok(())
    }

    async fn finalize(
        &self,
        run_id: RunId,
        spec: &WorkflowSpec,
        mut tracker: RunTracker,
        keep_data: bool,
    ) -> Result<RunState> {
        let state = tracker.final_state();

        // Joins cannot outlive the run; whatever is left is done by now.
        for (signal, _) in tracker.pending_joins.drain(..) {
            self.bus.publish(signal.reply_to(QueryReply::DagsJoined));
        }

        self.store
            .set(run_id, &Section::Meta, "state", json!(state))
            .await?;
        self.store
            .set(run_id, &Section::Meta, "end_time", json!(Utc::now()))
            .await?;
        if let Some((dag, task, kind)) = &tracker.first_failure {
            self.store
                .set(
                    run_id,
                    &Section::Meta,
                    "first_failure",
                    json!({ "dag": dag, "task": task, "kind": kind }),
                )
                .await?;
        }

        info!(run_id = %run_id, workflow = %spec.name, state = %state, "workflow run finished");
        self.bus
            .publish(Signal::of(run_id, SignalBody::WorkflowCompleted { state }));
        self.bus.close_run(run_id);

        if !keep_data {
            self.store.remove_doc(run_id).await?;
        }

        Ok(state)
    }
}
