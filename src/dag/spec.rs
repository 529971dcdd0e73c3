// src/dag/spec.rs

//! Static description of a DAG and its task nodes.

use std::collections::BTreeMap;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use crate::errors::{LightflowError, Result};
use crate::task::TaskBody;

/// Bounded retries with a fixed backoff between attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "backoff_millis", default = "default_backoff")]
    pub backoff: Duration,
}

fn default_backoff() -> Duration {
    Duration::from_millis(500)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: default_backoff(),
        }
    }
}

/// Serialize the backoff as plain milliseconds so workflow files stay simple.
mod backoff_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

/// What the DAG scheduler does when a task fails.
///
/// - `Strict` (default): cancel outstanding tasks and fail the DAG once
///   in-flight tasks drain.
/// - `Lenient`: skip the failed task's descendants and keep running the rest;
///   the DAG still terminates as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Strict,
    Lenient,
}

/// A single execution unit in a DAG.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub name: String,
    pub body: TaskBody,

    /// Input alias map (user-chosen name -> slot). Empty means the task takes
    /// the whole delivered envelope.
    pub inputs: BTreeMap<String, String>,

    /// Declared output slots. A command body writes its captured stdout under
    /// the first declared slot.
    pub outputs: Vec<String>,

    pub retry: RetryPolicy,

    /// Run even when flagged to be skipped.
    pub force_run: bool,

    /// Forward the skip flag to successors. With `false`, a skip of this task
    /// is absorbed instead of cascading below it.
    pub propagate_skip: bool,

    /// Fail with `EmptyInput` when no input envelope was delivered.
    pub require_input: bool,

    /// Declare that one output slot may fan out to several children.
    pub fan_out: bool,

    /// Wall-clock deadline enforced by the task runtime.
    pub deadline: Option<Duration>,
}

impl TaskNode {
    pub fn new(name: impl Into<String>, body: TaskBody) -> Self {
        Self {
            name: name.into(),
            body,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            retry: RetryPolicy::default(),
            force_run: false,
            propagate_skip: true,
            require_input: false,
            fan_out: false,
            deadline: None,
        }
    }
}

/// A directed edge, optionally labelled with the output slot it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub slot: Option<String>,
}

/// Blueprint of one DAG inside a workflow definition.
#[derive(Debug, Clone)]
pub struct DagSpec {
    pub name: String,
    pub autostart: bool,
    pub failure_policy: FailurePolicy,
    pub tasks: BTreeMap<String, TaskNode>,
    pub edges: Vec<Edge>,
}

impl DagSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            autostart: true,
            failure_policy: FailurePolicy::Strict,
            tasks: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn task(mut self, node: TaskNode) -> Self {
        self.tasks.insert(node.name.clone(), node);
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            slot: None,
        });
        self
    }

    pub fn edge_slot(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        slot: impl Into<String>,
    ) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            slot: Some(slot.into()),
        });
        self
    }

    /// Validate the blueprint: edge endpoints must be declared, a labelled
    /// slot may leave a task on at most one edge unless fan-out is declared,
    /// and the graph must be acyclic.
    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(LightflowError::DagValidation {
                dag: self.name.clone(),
                reason: "DAG contains no tasks".to_string(),
            });
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !self.tasks.contains_key(endpoint) {
                    return Err(LightflowError::DagValidation {
                        dag: self.name.clone(),
                        reason: format!(
                            "edge {} -> {} references undeclared task '{}'",
                            edge.from, edge.to, endpoint
                        ),
                    });
                }
            }
            if edge.from == edge.to {
                return Err(LightflowError::DagValidation {
                    dag: self.name.clone(),
                    reason: format!("task '{}' cannot depend on itself", edge.from),
                });
            }
        }

        self.validate_slot_fanout()?;
        self.validate_acyclic()
    }

    fn validate_slot_fanout(&self) -> Result<()> {
        let mut seen: BTreeMap<(&str, &str), usize> = BTreeMap::new();
        for edge in &self.edges {
            if let Some(slot) = &edge.slot {
                *seen.entry((edge.from.as_str(), slot.as_str())).or_default() += 1;
            }
        }

        for ((from, slot), count) in seen {
            if count > 1 {
                let declared = self.tasks.get(from).map(|t| t.fan_out).unwrap_or(false);
                if !declared {
                    return Err(LightflowError::DagValidation {
                        dag: self.name.clone(),
                        reason: format!(
                            "slot '{}' leaves task '{}' on {} edges but fan-out is not declared",
                            slot, from, count
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    fn validate_acyclic(&self) -> Result<()> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in self.tasks.keys() {
            graph.add_node(name.as_str());
        }
        for edge in &self.edges {
            graph.add_edge(edge.from.as_str(), edge.to.as_str(), ());
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(LightflowError::DagCycle {
                dag: self.name.clone(),
                task: cycle.node_id().to_string(),
            }),
        }
    }
}
