// src/signal/task_signal.rs

//! Convenience handle wrapping signal construction for task bodies.

use std::sync::Arc;
use std::time::Duration;

use crate::data::DataEnvelope;
use crate::errors::{LightflowError, Result};
use crate::signal::{QueryReply, QueryRequest, Signal, SignalBody, SignalBus};
use crate::types::RunId;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The signal handle handed to a running task.
///
/// Wraps the construction and sending of signals into easy to use methods,
/// scoped to the run and the DAG hosting the task.
#[derive(Clone)]
pub struct TaskSignal {
    bus: Arc<SignalBus>,
    run_id: RunId,
    dag_name: String,
    timeout: Duration,
}

impl TaskSignal {
    pub fn new(bus: Arc<SignalBus>, run_id: RunId, dag_name: impl Into<String>) -> Self {
        Self {
            bus,
            run_id,
            dag_name: dag_name.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn dag_name(&self) -> &str {
        &self.dag_name
    }

    /// Ask the workflow scheduler to start a DAG, optionally passing data to
    /// its root tasks. Returns the instance name of the started DAG.
    pub async fn run_dag(&self, dag: &str, envelope: Option<DataEnvelope>) -> Result<String> {
        let reply = self
            .bus
            .request(
                self.run_id,
                SignalBody::RunDag {
                    dag: dag.to_string(),
                    envelope,
                },
                self.timeout,
            )
            .await?;

        match reply {
            QueryReply::DagStarted { dag } => Ok(dag),
            QueryReply::Error { message } => Err(LightflowError::SignalUnavailable(message)),
            other => Err(LightflowError::SignalUnavailable(format!(
                "unexpected reply to run-dag: {:?}",
                other
            ))),
        }
    }

    /// Block until the named DAGs have terminated. With `None`, waits for all
    /// DAGs of the run except the one hosting this task.
    pub async fn join_dags(&self, dags: Option<Vec<String>>) -> Result<()> {
        let reply = self
            .bus
            .request(
                self.run_id,
                SignalBody::Query(QueryRequest::JoinDags {
                    dags,
                    asking_dag: self.dag_name.clone(),
                }),
                self.timeout,
            )
            .await?;

        match reply {
            QueryReply::DagsJoined => Ok(()),
            QueryReply::Error { message } => Err(LightflowError::SignalUnavailable(message)),
            other => Err(LightflowError::SignalUnavailable(format!(
                "unexpected reply to join-dags: {:?}",
                other
            ))),
        }
    }

    /// Request a co-operative stop of a DAG; defaults to the hosting DAG.
    pub async fn stop_dag(&self, dag: Option<&str>) {
        let dag = dag.unwrap_or(&self.dag_name).to_string();
        self.bus.publish(Signal::of(
            self.run_id,
            SignalBody::StopRequest { dag: Some(dag) },
        ));
    }

    /// Request a co-operative stop of the whole run.
    pub async fn stop_workflow(&self) {
        self.bus
            .publish(Signal::of(self.run_id, SignalBody::StopRequest { dag: None }));
    }

    /// Abort the run: terminal immediately, in-flight work is not drained.
    pub async fn abort_workflow(&self) {
        self.bus
            .publish(Signal::of(self.run_id, SignalBody::AbortRequest));
    }

    /// Whether a stop was requested for this task's DAG or the whole run.
    ///
    /// Long-running bodies poll this to terminate their work gracefully.
    pub async fn is_stop_requested(&self) -> Result<bool> {
        let reply = self
            .bus
            .request(
                self.run_id,
                SignalBody::Query(QueryRequest::IsStopRequested {
                    dag: self.dag_name.clone(),
                }),
                self.timeout,
            )
            .await?;

        match reply {
            QueryReply::StopRequested { stopped } => Ok(stopped),
            QueryReply::Error { message } => Err(LightflowError::SignalUnavailable(message)),
            other => Err(LightflowError::SignalUnavailable(format!(
                "unexpected reply to is-stop-requested: {:?}",
                other
            ))),
        }
    }
}
