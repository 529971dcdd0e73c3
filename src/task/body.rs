// src/task/body.rs

//! Task body kinds.
//!
//! A body is either a script (in-process user code invoked with the task
//! scope) or a command (an external process). Implementations live behind a
//! tagged variant so the task runtime can treat both uniformly.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::task::context::TaskScope;
use crate::task::TaskAction;

/// Future type for async script closures.
pub type BodyFuture<'a> = Pin<Box<dyn Future<Output = Result<TaskAction>> + Send + 'a>>;

/// In-process task body.
///
/// Implemented directly for bodies that need to await (store access, signal
/// queries); plain closures go through [`script`] / [`script_async`].
#[async_trait]
pub trait ScriptBody: Send + Sync {
    async fn run(&self, scope: &mut TaskScope) -> Result<TaskAction>;
}

/// External process body. The command string is run through the platform
/// shell, like `sh -c`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub cmd: String,
}

impl CommandSpec {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

/// The body reference of a task node.
#[derive(Clone)]
pub enum TaskBody {
    Script(Arc<dyn ScriptBody>),
    Command(CommandSpec),
}

impl fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskBody::Script(_) => write!(f, "Script(..)"),
            TaskBody::Command(spec) => write!(f, "Command({:?})", spec.cmd),
        }
    }
}

struct FnBody<F>(F);

#[async_trait]
impl<F> ScriptBody for FnBody<F>
where
    F: Fn(&mut TaskScope) -> Result<TaskAction> + Send + Sync,
{
    async fn run(&self, scope: &mut TaskScope) -> Result<TaskAction> {
        (self.0)(scope)
    }
}

/// Wrap a synchronous closure as a script body.
pub fn script<F>(f: F) -> TaskBody
where
    F: Fn(&mut TaskScope) -> Result<TaskAction> + Send + Sync + 'static,
{
    TaskBody::Script(Arc::new(FnBody(f)))
}

struct AsyncFnBody<F>(F);

#[async_trait]
impl<F> ScriptBody for AsyncFnBody<F>
where
    F: for<'a> Fn(&'a mut TaskScope) -> BodyFuture<'a> + Send + Sync,
{
    async fn run(&self, scope: &mut TaskScope) -> Result<TaskAction> {
        (self.0)(scope).await
    }
}

/// Wrap an async closure as a script body.
///
/// The closure returns a boxed future borrowing the scope:
/// `script_async(|scope| Box::pin(async move { ... }))`.
pub fn script_async<F>(f: F) -> TaskBody
where
    F: for<'a> Fn(&'a mut TaskScope) -> BodyFuture<'a> + Send + Sync + 'static,
{
    TaskBody::Script(Arc::new(AsyncFnBody(f)))
}
