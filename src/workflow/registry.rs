// src/workflow/registry.rs

//! Registry of workflow definitions known to a worker or CLI process.
//!
//! Workflows come from two sources: definition files (YAML) found on the
//! configured search paths, whose tasks are command bodies, and in-process
//! registrations with script bodies made by library consumers. Every worker
//! resolves job references against its own registry, so definitions must be
//! deployed to all hosts servicing a queue.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::model::Config;
use crate::dag::{DagSpec, Edge, FailurePolicy, RetryPolicy, TaskNode};
use crate::errors::{LightflowError, Result};
use crate::task::{CommandSpec, TaskBody};
use crate::workflow::spec::WorkflowSpec;

/// YAML shape of a workflow definition file.
#[derive(Debug, Deserialize)]
struct WorkflowFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    dags: BTreeMap<String, DagFile>,
    #[serde(default = "default_true")]
    stop_on_dag_failure: bool,
}

#[derive(Debug, Deserialize)]
struct DagFile {
    #[serde(default = "default_true")]
    autostart: bool,
    #[serde(default)]
    failure_policy: FailurePolicy,
    tasks: BTreeMap<String, TaskFile>,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    cmd: String,
    #[serde(default)]
    inputs: BTreeMap<String, String>,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    retry: Option<RetryPolicy>,
    #[serde(default)]
    force_run: bool,
    #[serde(default = "default_true")]
    propagate_skip: bool,
    #[serde(default)]
    require_input: bool,
    #[serde(default)]
    fan_out: bool,
    /// Wall-clock deadline in milliseconds.
    #[serde(default)]
    deadline_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl WorkflowFile {
    fn into_spec(self, fallback_name: &str) -> WorkflowSpec {
        let mut workflow = WorkflowSpec::new(self.name.unwrap_or_else(|| fallback_name.to_string()))
            .description(self.description)
            .stop_on_dag_failure(self.stop_on_dag_failure);

        for (dag_name, dag_file) in self.dags {
            let mut dag = DagSpec::new(dag_name)
                .autostart(dag_file.autostart)
                .failure_policy(dag_file.failure_policy);

            for (task_name, task_file) in dag_file.tasks {
                let mut node =
                    TaskNode::new(task_name, TaskBody::Command(CommandSpec::new(task_file.cmd)));
                node.inputs = task_file.inputs;
                node.outputs = task_file.outputs;
                node.retry = task_file.retry.unwrap_or_default();
                node.force_run = task_file.force_run;
                node.propagate_skip = task_file.propagate_skip;
                node.require_input = task_file.require_input;
                node.fan_out = task_file.fan_out;
                node.deadline = task_file.deadline_ms.map(Duration::from_millis);
                dag = dag.task(node);
            }

            dag.edges = dag_file.edges;
            workflow = workflow.dag(dag);
        }

        workflow
    }
}

/// The workflow definitions available to this process.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, WorkflowSpec>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load definitions from every search path in the configuration.
    ///
    /// A missing search path is skipped with a warning so a worker can start
    /// on a host that only services part of the deployment.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for path in &cfg.workflows {
            if !path.exists() {
                warn!(path = ?path, "workflow search path does not exist; skipping");
                continue;
            }
            registry.load_path(path)?;
        }
        Ok(registry)
    }

    /// Register a workflow built in-process. Validates all of its DAGs.
    pub fn register(&mut self, spec: WorkflowSpec) -> Result<()> {
        spec.validate()?;
        debug!(workflow = %spec.name, "registered workflow");
        self.workflows.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Load every `.yaml`/`.yml` workflow file under a search path.
    ///
    /// A file that fails to parse or validate is reported and skipped, so one
    /// broken definition does not take the whole search path down.
    pub fn load_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let entries = fs::read_dir(path).map_err(|err| {
            LightflowError::Config(format!(
                "cannot read workflow search path {:?}: {}",
                path, err
            ))
        })?;

        for entry in entries {
            let entry = entry?;
            let file_path = entry.path();
            let is_yaml = file_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }

            match self.load_file(&file_path) {
                Ok(name) => debug!(workflow = %name, file = ?file_path, "loaded workflow definition"),
                Err(err) => {
                    warn!(file = ?file_path, error = %err, "skipping invalid workflow definition")
                }
            }
        }

        Ok(())
    }

    /// Load a single definition file; returns the workflow name.
    pub fn load_file(&mut self, path: &Path) -> Result<String> {
        let contents = fs::read_to_string(path)?;
        let file: WorkflowFile = serde_yaml::from_str(&contents)?;

        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow");
        let spec = file.into_spec(fallback);
        let name = spec.name.clone();
        self.register(spec)?;
        Ok(name)
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowSpec> {
        self.workflows.get(name)
    }

    pub fn resolve(&self, name: &str) -> Result<&WorkflowSpec> {
        self.get(name)
            .ok_or_else(|| LightflowError::WorkflowNotFound(name.to_string()))
    }

    /// Workflow names and descriptions, sorted by name.
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.workflows
            .values()
            .map(|w| (w.name.as_str(), w.description.as_str()))
            .collect()
    }
}
