// src/task/context.rs

//! The context bundle handed to a running task body.

use crate::data::DataEnvelope;
use crate::signal::TaskSignal;
use crate::store::RunStoreHandle;
use crate::types::RunId;

/// Identifiers describing where a task execution is running.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub run_id: RunId,
    pub workflow: String,
    pub dag: String,
    pub task: String,
    pub attempt: u32,
}

/// Everything a task body can reach while it runs: its input data view, the
/// run's store handle, the signal handle and its own identifiers.
///
/// The body mutates `data` in place; whatever is left in it when the body
/// returns becomes the task's output envelope.
pub struct TaskScope {
    pub data: DataEnvelope,
    pub store: RunStoreHandle,
    pub signal: TaskSignal,
    pub context: TaskContext,
}
