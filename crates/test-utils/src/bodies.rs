//! Reusable script bodies for tests: record execution order, capture the
//! delivered envelope, produce values, fail on purpose.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use lightflow::data::DataEnvelope;
use lightflow::errors::LightflowError;
use lightflow::task::{script, script_async, TaskAction, TaskBody};

/// Shared log of task names in execution order.
pub type TaskLog = Arc<Mutex<Vec<String>>>;

/// Shared capture of the envelope each task received.
pub type EnvelopeCapture = Arc<Mutex<HashMap<String, DataEnvelope>>>;

pub fn new_log() -> TaskLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn new_capture() -> EnvelopeCapture {
    Arc::new(Mutex::new(HashMap::new()))
}

/// A body that records its task name.
pub fn record(log: TaskLog) -> TaskBody {
    script(move |scope| {
        log.lock().unwrap().push(scope.context.task.clone());
        Ok(TaskAction::default())
    })
}

/// A body that records its task name and captures its input envelope.
pub fn record_and_capture(log: TaskLog, capture: EnvelopeCapture) -> TaskBody {
    script(move |scope| {
        log.lock().unwrap().push(scope.context.task.clone());
        capture
            .lock()
            .unwrap()
            .insert(scope.context.task.clone(), scope.data.clone());
        Ok(TaskAction::default())
    })
}

/// A body that writes the given slots into its output envelope.
pub fn put_values(values: Vec<(&'static str, Value)>) -> TaskBody {
    script(move |scope| {
        for (slot, value) in &values {
            scope.data.set_value(slot.to_string(), value.clone());
        }
        Ok(TaskAction::default())
    })
}

/// A body that always fails with a task-body error.
pub fn fail(kind: &'static str, recoverable: bool) -> TaskBody {
    script(move |_scope| {
        Err(LightflowError::task_body(
            kind,
            "deliberate failure from test body",
            recoverable,
        ))
    })
}

/// A body that sleeps before recording, for stop/abort timing tests.
pub fn sleeper(duration: Duration, log: TaskLog) -> TaskBody {
    script_async(move |scope| {
        let log = Arc::clone(&log);
        let task = scope.context.task.clone();
        Box::pin(async move {
            tokio::time::sleep(duration).await;
            log.lock().unwrap().push(task);
            Ok(TaskAction::default())
        })
    })
}
