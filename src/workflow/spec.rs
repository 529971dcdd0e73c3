// src/workflow/spec.rs

//! Static description of a workflow: a named bundle of DAG blueprints.

use std::collections::BTreeMap;

use crate::dag::DagSpec;
use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct WorkflowSpec {
    pub name: String,
    /// One-line description shown by `workflow list`.
    pub description: String,
    pub dags: BTreeMap<String, DagSpec>,
    /// Broadcast a stop to the remaining DAGs when one of them fails.
    pub stop_on_dag_failure: bool,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            dags: BTreeMap::new(),
            stop_on_dag_failure: true,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn dag(mut self, spec: DagSpec) -> Self {
        self.dags.insert(spec.name.clone(), spec);
        self
    }

    pub fn stop_on_dag_failure(mut self, stop: bool) -> Self {
        self.stop_on_dag_failure = stop;
        self
    }

    /// Validate every DAG blueprint. Runs at registration and again before a
    /// workflow job is enqueued, so invalid graphs never reach a worker.
    pub fn validate(&self) -> Result<()> {
        for dag in self.dags.values() {
            dag.validate()?;
        }
        Ok(())
    }

    /// Names of the DAGs enqueued automatically at workflow start.
    pub fn autostart_dags(&self) -> Vec<&str> {
        self.dags
            .values()
            .filter(|d| d.autostart)
            .map(|d| d.name.as_str())
            .collect()
    }
}
