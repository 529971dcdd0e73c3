// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line client for lightflow, a distributed workflow engine.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lightflow",
    version,
    about = "Run workflows as DAGs of tasks over broker queues.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the configuration file (YAML).
    ///
    /// Default: `lightflow.cfg` in the current working directory.
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LIGHTFLOW_LOG` or the configured level is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Manage the configuration.
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
    /// Start, stop and inspect workflows.
    Workflow {
        #[command(subcommand)]
        cmd: WorkflowCmd,
    },
    /// Start and stop workers.
    Worker {
        #[command(subcommand)]
        cmd: WorkerCmd,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCmd {
    /// Write the default configuration to `<dir>/lightflow.cfg`.
    Default { dir: String },
    /// Copy the example workflow definitions into a directory.
    Examples { dir: String },
}

#[derive(Debug, Clone, Subcommand)]
pub enum WorkflowCmd {
    /// List the workflows found on the configured search paths.
    List,
    /// Enqueue a workflow job and exit after submission.
    Start {
        /// Name of the workflow to start.
        name: String,
        /// Keep the run document after the run reaches a terminal state.
        #[arg(long, short = 'k')]
        keep_data: bool,
        /// Launch parameters in the form key=value.
        #[arg(value_name = "KEY=VALUE")]
        args: Vec<String>,
    },
    /// Request a co-operative stop of a run.
    Stop { run_id: String },
    /// Abort a run without draining.
    Abort { run_id: String },
    /// Query the status of a run, or of the workers when no run is given.
    Status { run_id: Option<String> },
}

#[derive(Debug, Clone, Subcommand)]
pub enum WorkerCmd {
    /// Start a worker process.
    Start {
        /// Comma separated list of queues to service (workflow, dag, task).
        #[arg(long, short = 'q', value_name = "QUEUES")]
        queues: Option<String>,
    },
    /// Ask running workers to stop after draining.
    Stop,
    /// Show the status of a running worker.
    Status,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
