// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod data;
pub mod errors;
pub mod logging;
pub mod queue;
pub mod signal;
pub mod store;
pub mod task;
pub mod types;
pub mod worker;
pub mod workflow;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::cli::{CliArgs, Command, ConfigCmd, WorkerCmd, WorkflowCmd};
use crate::config::Config;
use crate::errors::{LightflowError, Result};
use crate::queue::{JobKind, JobQueue, JobRecord, MemoryBroker};
use crate::signal::{QueryReply, QueryRequest, Signal, SignalBody, SignalBus};
use crate::store::{DocumentStore, MemoryStore};
use crate::types::RunId;
use crate::worker::Worker;
use crate::workflow::WorkflowRegistry;

const STATUS_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Example workflow definitions shipped with the binary, written out by
/// `config examples <dir>`.
const EXAMPLE_WORKFLOWS: &[(&str, &str)] = &[
    ("hello.yaml", include_str!("../demos/hello.yaml")),
    ("diamond.yaml", include_str!("../demos/diamond.yaml")),
    ("subdag.yaml", include_str!("../demos/subdag.yaml")),
];

/// The engine's handles to its collaborators: job queue, signal bus,
/// document store and the workflow registry of this process.
///
/// `connect` wires up the in-process substrate; a deployment with remote
/// broker and store clients builds an `Engine` from its own trait objects.
#[derive(Clone)]
pub struct Engine {
    pub queue: Arc<dyn JobQueue>,
    pub bus: Arc<SignalBus>,
    pub store: Arc<dyn DocumentStore>,
    pub registry: Arc<WorkflowRegistry>,
}

impl Engine {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        bus: Arc<SignalBus>,
        store: Arc<dyn DocumentStore>,
        registry: Arc<WorkflowRegistry>,
    ) -> Self {
        Self {
            queue,
            bus,
            store,
            registry,
        }
    }

    /// Build an engine from the configuration, loading workflow definitions
    /// from the configured search paths.
    pub fn connect(cfg: &Config) -> Result<Self> {
        let registry = WorkflowRegistry::from_config(cfg)?;
        Ok(Self::new(
            Arc::new(MemoryBroker::new()),
            Arc::new(SignalBus::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(registry),
        ))
    }

    /// Validate a workflow and enqueue its job. Returns the new run id.
    ///
    /// Validation happens before submission, so a DAG with a cycle or a bad
    /// edge never produces a job.
    pub async fn submit_workflow(
        &self,
        name: &str,
        args: BTreeMap<String, Value>,
        keep_data: bool,
    ) -> Result<RunId> {
        let run_id = RunId::new();
        self.submit_workflow_with_id(run_id, name, args, keep_data)
            .await?;
        Ok(run_id)
    }

    /// Like [`Engine::submit_workflow`] with a caller-chosen run id, so the
    /// caller can subscribe to the run's signal channel before submission.
    pub async fn submit_workflow_with_id(
        &self,
        run_id: RunId,
        name: &str,
        args: BTreeMap<String, Value>,
        keep_data: bool,
    ) -> Result<()> {
        let spec = self.registry.resolve(name)?;
        spec.validate()?;

        self.queue
            .submit(JobRecord::workflow(run_id, name, args, keep_data))
            .await?;
        info!(run_id = %run_id, workflow = %name, "workflow job submitted");
        Ok(())
    }

    /// A worker servicing the given queues with this engine's handles.
    pub fn worker(&self, queues: Vec<JobKind>, concurrency: usize) -> Worker {
        Worker::new(
            queues,
            Arc::clone(&self.queue),
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            concurrency,
        )
    }
}

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs, cfg: Config) -> Result<i32> {
    match args.command {
        Command::Config { cmd } => run_config_cmd(cmd),
        Command::Workflow { cmd } => run_workflow_cmd(cmd, &cfg).await,
        Command::Worker { cmd } => run_worker_cmd(cmd, &cfg).await,
    }
}

fn run_config_cmd(cmd: ConfigCmd) -> Result<i32> {
    match cmd {
        ConfigCmd::Default { dir } => {
            fs::create_dir_all(&dir)?;
            let path = Path::new(&dir).join("lightflow.cfg");
            fs::write(&path, Config::default_yaml())?;
            println!("wrote default configuration to {}", path.display());
            Ok(0)
        }
        ConfigCmd::Examples { dir } => {
            fs::create_dir_all(&dir)?;
            for (name, contents) in EXAMPLE_WORKFLOWS {
                let path = Path::new(&dir).join(name);
                fs::write(&path, contents)?;
                println!("wrote {}", path.display());
            }
            Ok(0)
        }
    }
}

async fn run_workflow_cmd(cmd: WorkflowCmd, cfg: &Config) -> Result<i32> {
    let engine = Engine::connect(cfg)?;

    match cmd {
        WorkflowCmd::List => {
            let workflows = engine.registry.list();
            if workflows.is_empty() {
                println!("no workflows found on the configured search paths");
            }
            for (name, description) in workflows {
                println!("{:24} {}", name, description);
            }
            Ok(0)
        }
        WorkflowCmd::Start {
            name,
            keep_data,
            args,
        } => {
            let args = parse_launch_args(&args)?;
            let run_id = engine.submit_workflow(&name, args, keep_data).await?;
            println!("started workflow '{}' with run id {}", name, run_id);
            Ok(0)
        }
        WorkflowCmd::Stop { run_id } => {
            let run_id = parse_run_id(&run_id)?;
            engine
                .bus
                .publish(Signal::of(run_id, SignalBody::StopRequest { dag: None }));
            println!("stop requested for run {}", run_id);
            Ok(0)
        }
        WorkflowCmd::Abort { run_id } => {
            let run_id = parse_run_id(&run_id)?;
            engine
                .bus
                .publish(Signal::of(run_id, SignalBody::AbortRequest));
            println!("abort requested for run {}", run_id);
            Ok(0)
        }
        WorkflowCmd::Status { run_id: Some(run_id) } => {
            let run_id = parse_run_id(&run_id)?;
            match engine
                .bus
                .request(
                    run_id,
                    SignalBody::Query(QueryRequest::WorkflowStatus),
                    STATUS_REQUEST_TIMEOUT,
                )
                .await
            {
                Ok(QueryReply::WorkflowStatus { state, live_dags }) => {
                    println!("run {}: {}", run_id, state);
                    for dag in live_dags {
                        println!("  live dag: {}", dag);
                    }
                }
                Ok(other) => println!("unexpected reply: {:?}", other),
                Err(LightflowError::Timeout(_)) => {
                    println!("run {}: no reply (unknown or already finished)", run_id);
                }
                Err(err) => return Err(err),
            }
            Ok(0)
        }
        WorkflowCmd::Status { run_id: None } => print_worker_status(&engine).await,
    }
}

async fn run_worker_cmd(cmd: WorkerCmd, cfg: &Config) -> Result<i32> {
    let engine = Engine::connect(cfg)?;

    match cmd {
        WorkerCmd::Start { queues } => {
            let queues = match queues {
                Some(csv) => parse_queues(&csv)?,
                None => parse_queue_names(&cfg.worker.queues_default)?,
            };

            // Ctrl-C turns into a worker stop on the control channel.
            {
                let bus = Arc::clone(&engine.bus);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        bus.publish(Signal::of(
                            RunId::control(),
                            SignalBody::StopRequest { dag: None },
                        ));
                    }
                });
            }

            let worker = engine.worker(queues, cfg.worker.concurrency);
            worker.run().await?;
            Ok(0)
        }
        WorkerCmd::Stop => {
            engine.bus.publish(Signal::of(
                RunId::control(),
                SignalBody::StopRequest { dag: None },
            ));
            println!("worker stop requested");
            Ok(0)
        }
        WorkerCmd::Status => print_worker_status(&engine).await,
    }
}

async fn print_worker_status(engine: &Engine) -> Result<i32> {
    match engine
        .bus
        .request(
            RunId::control(),
            SignalBody::Query(QueryRequest::WorkerStatus),
            STATUS_REQUEST_TIMEOUT,
        )
        .await
    {
        Ok(QueryReply::WorkerStatus {
            worker,
            queues,
            active_jobs,
        }) => {
            println!("worker {}", worker);
            println!(
                "  queues: {}",
                queues
                    .iter()
                    .map(|q| q.queue_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            if active_jobs.is_empty() {
                println!("  idle");
            }
            for job in active_jobs {
                println!("  active: {}", job);
            }
            Ok(0)
        }
        Ok(other) => {
            println!("unexpected reply: {:?}", other);
            Ok(0)
        }
        Err(LightflowError::Timeout(_)) => {
            println!("no worker replied");
            Ok(0)
        }
        Err(err) => Err(err),
    }
}

/// Parse `key=value` launch parameters.
fn parse_launch_args(args: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut parsed = BTreeMap::new();
    for arg in args {
        let (key, value) = arg.split_once('=').ok_or_else(|| {
            LightflowError::Config(format!(
                "invalid launch parameter '{}' (expected key=value)",
                arg
            ))
        })?;
        parsed.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(parsed)
}

fn parse_run_id(s: &str) -> Result<RunId> {
    s.parse()
        .map_err(|_| LightflowError::Config(format!("invalid run id '{}'", s)))
}

fn parse_queues(csv: &str) -> Result<Vec<JobKind>> {
    csv.split(',')
        .map(|name| {
            JobKind::parse(name).ok_or_else(|| {
                LightflowError::Config(format!(
                    "unknown queue '{}' (expected workflow, dag or task)",
                    name
                ))
            })
        })
        .collect()
}

fn parse_queue_names(names: &[String]) -> Result<Vec<JobKind>> {
    names
        .iter()
        .map(|name| {
            JobKind::parse(name).ok_or_else(|| {
                LightflowError::Config(format!("unknown queue '{}' in configuration", name))
            })
        })
        .collect()
}
