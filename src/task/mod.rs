// src/task/mod.rs

pub mod body;
pub mod context;
pub mod runtime;

use serde::{Deserialize, Serialize};

pub use body::{script, script_async, BodyFuture, CommandSpec, ScriptBody, TaskBody};
pub use context::{TaskContext, TaskScope};
pub use runtime::run_task;

/// Routing decision returned by a successful task.
///
/// `limit` restricts propagation to the named children; children left out
/// are treated as skip targets. `skip` explicitly marks descendants to skip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRouting {
    pub limit: Option<Vec<String>>,
    pub skip: Vec<String>,
}

impl TaskRouting {
    /// Propagate along every outgoing edge.
    pub fn all() -> Self {
        Self::default()
    }

    /// Propagate only to the named children.
    pub fn limit_to<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            limit: Some(children.into_iter().map(Into::into).collect()),
            skip: Vec::new(),
        }
    }

    /// Mark the named descendants as skipped.
    pub fn skipping<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            limit: None,
            skip: targets.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether propagation along the edge to `child` is suppressed.
    pub fn suppresses(&self, child: &str) -> bool {
        match &self.limit {
            Some(allowed) => !allowed.iter().any(|c| c == child),
            None => false,
        }
    }
}

/// What a task body asks the engine to do after it ran.
#[derive(Debug, Clone)]
pub enum TaskAction {
    /// Normal completion; propagate output per the routing decision.
    Continue { routing: TaskRouting },
    /// Record the completion, then stop the hosting DAG.
    StopDag,
    /// Record the completion, then stop the whole run co-operatively.
    StopWorkflow,
    /// Terminate the run immediately without draining.
    AbortWorkflow,
}

impl Default for TaskAction {
    fn default() -> Self {
        TaskAction::Continue {
            routing: TaskRouting::all(),
        }
    }
}

impl TaskAction {
    pub fn with_routing(routing: TaskRouting) -> Self {
        TaskAction::Continue { routing }
    }
}
