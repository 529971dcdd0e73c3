// src/queue/job.rs

//! Job records travelling over the broker queues.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::DataEnvelope;
use crate::types::RunId;

/// The logical queue a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Workflow,
    Dag,
    Task,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Workflow, JobKind::Dag, JobKind::Task];

    pub fn queue_name(self) -> &'static str {
        match self {
            JobKind::Workflow => "workflow",
            JobKind::Dag => "dag",
            JobKind::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "workflow" => Some(JobKind::Workflow),
            "dag" => Some(JobKind::Dag),
            "task" => Some(JobKind::Task),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.queue_name())
    }
}

/// Kind-specific payload of a job record.
///
/// Task jobs carry the merged input envelope; workflow and DAG jobs carry
/// references that the consuming worker resolves against its workflow
/// registry, so records stay serializable across hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobPayload {
    Workflow {
        workflow: String,
        args: BTreeMap<String, Value>,
        /// Keep the run document after the run reaches a terminal state.
        keep_data: bool,
    },
    Dag {
        workflow: String,
        /// Name of the DAG blueprint inside the workflow definition.
        spec_dag: String,
        /// Envelope passed from the task that requested this DAG, if any.
        envelope: Option<DataEnvelope>,
    },
    Task {
        workflow: String,
        /// Name of the DAG blueprint the task node is declared in.
        spec_dag: String,
        envelope: DataEnvelope,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Workflow { .. } => JobKind::Workflow,
            JobPayload::Dag { .. } => JobKind::Dag,
            JobPayload::Task { .. } => JobKind::Task,
        }
    }
}

/// One unit of work on a broker queue.
///
/// Owned by the broker until a worker acknowledges it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub kind: JobKind,
    pub run_id: RunId,
    /// DAG instance name, for dag and task jobs.
    pub dag_name: Option<String>,
    pub task_name: Option<String>,
    pub payload: JobPayload,
    /// Delivery attempt, starting at 1. Bumped by the broker on requeue.
    pub attempt: u32,
}

impl JobRecord {
    pub fn workflow(
        run_id: RunId,
        workflow: impl Into<String>,
        args: BTreeMap<String, Value>,
        keep_data: bool,
    ) -> Self {
        Self {
            kind: JobKind::Workflow,
            run_id,
            dag_name: None,
            task_name: None,
            payload: JobPayload::Workflow {
                workflow: workflow.into(),
                args,
                keep_data,
            },
            attempt: 1,
        }
    }

    pub fn dag(
        run_id: RunId,
        workflow: impl Into<String>,
        spec_dag: impl Into<String>,
        instance: impl Into<String>,
        envelope: Option<DataEnvelope>,
    ) -> Self {
        Self {
            kind: JobKind::Dag,
            run_id,
            dag_name: Some(instance.into()),
            task_name: None,
            payload: JobPayload::Dag {
                workflow: workflow.into(),
                spec_dag: spec_dag.into(),
                envelope,
            },
            attempt: 1,
        }
    }

    pub fn task(
        run_id: RunId,
        workflow: impl Into<String>,
        spec_dag: impl Into<String>,
        dag: impl Into<String>,
        task: impl Into<String>,
        envelope: DataEnvelope,
    ) -> Self {
        Self {
            kind: JobKind::Task,
            run_id,
            dag_name: Some(dag.into()),
            task_name: Some(task.into()),
            payload: JobPayload::Task {
                workflow: workflow.into(),
                spec_dag: spec_dag.into(),
                envelope,
            },
            attempt: 1,
        }
    }

    /// Human-readable description for logs.
    pub fn describe(&self) -> String {
        match (&self.dag_name, &self.task_name) {
            (Some(dag), Some(task)) => format!("{} {}/{}", self.kind, dag, task),
            (Some(dag), None) => format!("{} {}", self.kind, dag),
            _ => format!("{} run {}", self.kind, self.run_id),
        }
    }
}
