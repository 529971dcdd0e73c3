// src/task/runtime.rs

//! Execution of a single task node.
//!
//! The runtime materialises the body-facing data view, invokes the body with
//! its context bundle, classifies the outcome and emits the corresponding
//! signal. The outcome signal is published before the worker acks the job,
//! so a completion is never lost to a crash between body and ack.
//!
//! Store writes performed by the body persist regardless of the outcome;
//! nothing is rolled back on failure.

use std::process::Stdio;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::dag::spec::TaskNode;
use crate::data::DataEnvelope;
use crate::errors::{LightflowError, Result};
use crate::signal::{Signal, SignalBody, SignalBus, TaskSignal};
use crate::store::RunStoreHandle;
use crate::task::body::{CommandSpec, TaskBody};
use crate::task::context::{TaskContext, TaskScope};
use crate::task::{TaskAction, TaskRouting};
use crate::types::RunId;

/// Run one task job to its outcome signal.
///
/// Returns `Err` only for infrastructure failures at the job level; user
/// errors are classified and surfaced as `task-failed` without crashing the
/// worker.
pub async fn run_task(
    node: &TaskNode,
    context: TaskContext,
    input: DataEnvelope,
    store: RunStoreHandle,
    bus: Arc<SignalBus>,
) -> Result<()> {
    let run_id = context.run_id;
    let dag = context.dag.clone();
    let task = context.task.clone();

    info!(
        run_id = %run_id,
        dag = %dag,
        task = %task,
        attempt = context.attempt,
        "running task"
    );

    let view = match input.select_for_task(&node.name, &node.inputs, node.require_input) {
        Ok(view) => view,
        Err(err) => {
            warn!(run_id = %run_id, dag = %dag, task = %task, error = %err, "input selection failed");
            bus.publish(Signal::of(
                run_id,
                SignalBody::TaskFailed {
                    dag,
                    task,
                    kind: err.kind_tag().to_string(),
                },
            ));
            return Ok(());
        }
    };

    let signal = TaskSignal::new(bus.clone(), run_id, dag.clone());

    let max_attempts = node.retry.max_attempts.max(1);
    let mut attempt = 1;

    let outcome = loop {
        let mut scope = TaskScope {
            data: view.fork(),
            store: store.clone(),
            signal: signal.clone(),
            context: TaskContext {
                attempt,
                ..context.clone()
            },
        };

        match invoke_body(node, &mut scope).await {
            Ok(action) => break Ok((action, scope.data)),
            // Control-flow errors from the body map onto the matching
            // success-with-stop outcomes.
            Err(LightflowError::StopRequested) => break Ok((TaskAction::StopDag, scope.data)),
            Err(LightflowError::AbortRequested) => {
                break Ok((TaskAction::AbortWorkflow, scope.data))
            }
            Err(err) if err.is_recoverable() && attempt < max_attempts => {
                warn!(
                    run_id = %run_id,
                    dag = %dag,
                    task = %task,
                    attempt,
                    max_attempts,
                    error = %err,
                    "task attempt failed; retrying after backoff"
                );
                tokio::time::sleep(node.retry.backoff).await;
                attempt += 1;
            }
            Err(err) => break Err(err),
        }
    };

    match outcome {
        Ok((action, mut data)) => {
            data.append_history(&task);
            publish_success(&bus, run_id, &dag, &task, data, action);
        }
        Err(err) => {
            error!(
                run_id = %run_id,
                dag = %dag,
                task = %task,
                error = %err,
                "task failed after exhausting retry budget"
            );
            bus.publish(Signal::of(
                run_id,
                SignalBody::TaskFailed {
                    dag,
                    task,
                    kind: err.kind_tag().to_string(),
                },
            ));
        }
    }

    Ok(())
}

fn publish_success(
    bus: &SignalBus,
    run_id: RunId,
    dag: &str,
    task: &str,
    envelope: DataEnvelope,
    action: TaskAction,
) {
    let (routing, stop_dag) = match &action {
        TaskAction::Continue { routing } => (routing.clone(), false),
        TaskAction::StopDag => (TaskRouting::all(), true),
        TaskAction::StopWorkflow | TaskAction::AbortWorkflow => (TaskRouting::all(), false),
    };

    bus.publish(Signal::of(
        run_id,
        SignalBody::TaskCompleted {
            dag: dag.to_string(),
            task: task.to_string(),
            envelope,
            routing,
            stop_dag,
        },
    ));

    match action {
        TaskAction::StopWorkflow => {
            info!(run_id = %run_id, dag = %dag, task = %task, "task requested workflow stop");
            bus.publish(Signal::of(run_id, SignalBody::StopRequest { dag: None }));
        }
        TaskAction::AbortWorkflow => {
            warn!(run_id = %run_id, dag = %dag, task = %task, "task requested workflow abort");
            bus.publish(Signal::of(run_id, SignalBody::AbortRequest));
        }
        TaskAction::Continue { .. } | TaskAction::StopDag => {}
    }
}

/// Invoke the task body, enforcing the optional wall-clock deadline.
async fn invoke_body(node: &TaskNode, scope: &mut TaskScope) -> Result<TaskAction> {
    let task = node.name.clone();

    match node.deadline {
        Some(deadline) => {
            match tokio::time::timeout(deadline, dispatch_body(node, scope)).await {
                Ok(result) => result,
                Err(_) => Err(LightflowError::Timeout(format!(
                    "task '{}' exceeded its deadline of {:?}",
                    task, deadline
                ))),
            }
        }
        None => dispatch_body(node, scope).await,
    }
}

async fn dispatch_body(node: &TaskNode, scope: &mut TaskScope) -> Result<TaskAction> {
    match &node.body {
        TaskBody::Script(body) => body.run(scope).await,
        TaskBody::Command(spec) => run_command(spec, node, scope).await,
    }
}

/// Spawn an external process for a command body, capturing its streams.
async fn run_command(
    spec: &CommandSpec,
    node: &TaskNode,
    scope: &mut TaskScope,
) -> Result<TaskAction> {
    let context = &scope.context;
    debug!(task = %node.name, cmd = %spec.cmd, "starting task process");

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&spec.cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&spec.cmd);
        c
    };

    cmd.env("LIGHTFLOW_RUN_ID", context.run_id.to_string())
        .env("LIGHTFLOW_WORKFLOW", &context.workflow)
        .env("LIGHTFLOW_DAG", &context.dag)
        .env("LIGHTFLOW_TASK", &context.task)
        .env("LIGHTFLOW_ATTEMPT", context.attempt.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        LightflowError::task_body(
            "spawn",
            format!("spawning process for task '{}': {}", node.name, err),
            true,
        )
    })?;

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let task_name = node.name.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, "stderr: {}", line);
            }
        });
    }

    let mut captured = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|err| LightflowError::task_body("stdout", err.to_string(), true))?
        {
            debug!(task = %node.name, "stdout: {}", line);
            captured.push(line);
        }
    }

    let status = child.wait().await.map_err(|err| {
        LightflowError::task_body(
            "wait",
            format!("waiting for process of task '{}': {}", node.name, err),
            true,
        )
    })?;

    let code = status.code().unwrap_or(-1);
    debug!(
        task = %node.name,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    if !status.success() {
        return Err(LightflowError::task_body(
            "command",
            format!("command for task '{}' exited with code {}", node.name, code),
            true,
        ));
    }

    // Captured output lands under the first declared output slot.
    if let Some(slot) = node.outputs.first() {
        scope
            .data
            .set_value(slot.clone(), Value::String(captured.join("\n")));
    }

    Ok(TaskAction::default())
}
