// src/signal/mod.rs

pub mod bus;
pub mod task_signal;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::DataEnvelope;
use crate::queue::JobKind;
use crate::task::TaskRouting;
use crate::types::{RunId, RunState};

pub use bus::{SignalBus, SignalStream};
pub use task_signal::TaskSignal;

/// A coordination message on the run-scoped signal bus.
///
/// Signals are ephemeral; they carry coordination, never the authoritative
/// work record (that lives on the job queue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub run_id: RunId,
    /// Ties a `QueryReply` back to the signal that requested it.
    pub correlation_id: Uuid,
    pub body: SignalBody,
}

impl Signal {
    pub fn of(run_id: RunId, body: SignalBody) -> Self {
        Self {
            run_id,
            correlation_id: Uuid::new_v4(),
            body,
        }
    }

    /// A reply carrying the correlation id of the signal it answers.
    pub fn reply_to(&self, reply: QueryReply) -> Self {
        Self {
            run_id: self.run_id,
            correlation_id: self.correlation_id,
            body: SignalBody::QueryReply(reply),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum SignalBody {
    /// A task finished successfully. `stop_dag` asks the hosting DAG to stop
    /// dispatching after recording the completion.
    TaskCompleted {
        dag: String,
        task: String,
        envelope: DataEnvelope,
        routing: TaskRouting,
        stop_dag: bool,
    },
    /// A task exhausted its retry budget.
    TaskFailed {
        dag: String,
        task: String,
        kind: String,
    },
    TaskSkipped {
        dag: String,
        task: String,
    },
    /// Ask the workflow scheduler to enqueue a DAG that is not autostarted.
    RunDag {
        dag: String,
        envelope: Option<DataEnvelope>,
    },
    DagCompleted {
        dag: String,
        stopped: bool,
    },
    DagFailed {
        dag: String,
        aborted: bool,
        /// First failing task and its error kind, for the run summary.
        failed_task: Option<String>,
        failure_kind: Option<String>,
    },
    /// Co-operative stop. `dag: None` addresses the whole run.
    StopRequest {
        dag: Option<String>,
    },
    AbortRequest,
    Query(QueryRequest),
    QueryReply(QueryReply),
    WorkflowCompleted {
        state: RunState,
    },
}

impl SignalBody {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalBody::TaskCompleted { .. } => "task-completed",
            SignalBody::TaskFailed { .. } => "task-failed",
            SignalBody::TaskSkipped { .. } => "task-skipped",
            SignalBody::RunDag { .. } => "run-dag",
            SignalBody::DagCompleted { .. } => "dag-completed",
            SignalBody::DagFailed { .. } => "dag-failed",
            SignalBody::StopRequest { .. } => "stop-request",
            SignalBody::AbortRequest => "abort-request",
            SignalBody::Query(_) => "query",
            SignalBody::QueryReply(_) => "query-reply",
            SignalBody::WorkflowCompleted { .. } => "workflow-completed",
        }
    }
}

/// Introspection and coordination questions answered over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "kebab-case")]
pub enum QueryRequest {
    /// Block until the named DAGs (or, with `None`, all DAGs of the run other
    /// than the asking one) have terminated.
    JoinDags {
        dags: Option<Vec<String>>,
        asking_dag: String,
    },
    IsStopRequested {
        dag: String,
    },
    WorkflowStatus,
    WorkerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "kebab-case")]
pub enum QueryReply {
    /// The DAG instance name assigned by the workflow scheduler.
    DagStarted { dag: String },
    DagsJoined,
    StopRequested { stopped: bool },
    WorkflowStatus {
        state: RunState,
        live_dags: Vec<String>,
    },
    WorkerStatus {
        worker: String,
        queues: Vec<JobKind>,
        active_jobs: Vec<String>,
    },
    Error { message: String },
}
