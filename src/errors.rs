// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LightflowError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown workflow: {0}")]
    WorkflowNotFound(String),

    #[error("cycle detected in DAG '{dag}' involving task '{task}'")]
    DagCycle { dag: String, task: String },

    #[error("invalid DAG '{dag}': {reason}")]
    DagValidation { dag: String, reason: String },

    #[error("task body error ({kind}): {message}")]
    TaskBody {
        kind: String,
        message: String,
        recoverable: bool,
    },

    #[error("data routing error: {0}")]
    DataRouting(String),

    #[error("unknown alias '{alias}' in input of task '{task}'")]
    UnknownAlias { task: String, alias: String },

    #[error("no input data delivered to task '{0}'")]
    EmptyInput(String),

    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("signal bus unavailable: {0}")]
    SignalUnavailable(String),

    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("abort requested")]
    AbortRequested,

    #[error("stop requested")]
    StopRequested,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LightflowError {
    /// A classified error from a user task body.
    pub fn task_body(
        kind: impl Into<String>,
        message: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        LightflowError::TaskBody {
            kind: kind.into(),
            message: message.into(),
            recoverable,
        }
    }

    /// Short machine-readable tag for the error kind.
    ///
    /// Used when a task failure is surfaced on the signal bus, where the
    /// receiving side only needs a classification, not the full error chain.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            LightflowError::Config(_) => "config",
            LightflowError::WorkflowNotFound(_) => "workflow-not-found",
            LightflowError::DagCycle { .. } => "dag-cycle",
            LightflowError::DagValidation { .. } => "dag-validation",
            LightflowError::TaskBody { .. } => "task-body",
            LightflowError::DataRouting(_) => "data-routing",
            LightflowError::UnknownAlias { .. } => "unknown-alias",
            LightflowError::EmptyInput(_) => "empty-input",
            LightflowError::QueueUnavailable(_) => "queue-unavailable",
            LightflowError::SignalUnavailable(_) => "signal-unavailable",
            LightflowError::StoreUnavailable(_) => "store-unavailable",
            LightflowError::Timeout(_) => "timeout",
            LightflowError::AbortRequested => "abort-requested",
            LightflowError::StopRequested => "stop-requested",
            LightflowError::Io(_) => "io",
            LightflowError::Yaml(_) => "yaml",
            LightflowError::Other(_) => "other",
        }
    }

    /// Process exit code for the CLI: 1 user/config error, 2 broker/store
    /// unreachable, 3 unknown workflow.
    pub fn exit_code(&self) -> i32 {
        match self {
            LightflowError::WorkflowNotFound(_) => 3,
            LightflowError::QueueUnavailable(_)
            | LightflowError::SignalUnavailable(_)
            | LightflowError::StoreUnavailable(_) => 2,
            _ => 1,
        }
    }

    /// Whether retrying the failed operation can reasonably succeed.
    ///
    /// Infrastructure errors are transient; validation errors are not. Task
    /// body errors carry their own classification.
    pub fn is_recoverable(&self) -> bool {
        match self {
            LightflowError::TaskBody { recoverable, .. } => *recoverable,
            LightflowError::QueueUnavailable(_)
            | LightflowError::SignalUnavailable(_)
            | LightflowError::StoreUnavailable(_)
            | LightflowError::Timeout(_)
            | LightflowError::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LightflowError>;
