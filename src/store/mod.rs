// src/store/mod.rs

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;
use crate::types::RunId;

pub use memory::MemoryStore;

/// Logical section of a run's document.
///
/// The document for one workflow run is laid out as
/// `meta/*`, `workflow/*`, `dag/<dag>/*` and `task/<dag>/<task>/*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Section {
    Meta,
    Workflow,
    Dag(String),
    Task { dag: String, task: String },
}

impl Section {
    /// Key prefix for this section inside the document.
    pub fn prefix(&self) -> String {
        match self {
            Section::Meta => "meta".to_string(),
            Section::Workflow => "workflow".to_string(),
            Section::Dag(dag) => format!("dag/{}", dag),
            Section::Task { dag, task } => format!("task/{}/{}", dag, task),
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// The persistent keyed document shared by all tasks of a run.
///
/// The concrete store client is an external collaborator; the engine only
/// relies on this interface. Writes are atomic per key with last-writer-wins
/// semantics; readers must tolerate stale reads. Cross-key transactions are
/// not provided.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the document for a run. Must happen before any task runs.
    async fn create_doc(&self, run_id: RunId) -> Result<()>;

    /// Remove the document once the run reached a terminal state.
    async fn remove_doc(&self, run_id: RunId) -> Result<()>;

    async fn doc_exists(&self, run_id: RunId) -> Result<bool>;

    async fn get(&self, run_id: RunId, section: &Section, key: &str) -> Result<Option<Value>>;

    async fn set(&self, run_id: RunId, section: &Section, key: &str, value: Value) -> Result<()>;

    /// Append to a list-valued key, creating the list if absent.
    async fn push(&self, run_id: RunId, section: &Section, key: &str, value: Value) -> Result<()>;

    async fn exists(&self, run_id: RunId, section: &Section, key: &str) -> Result<bool>;

    async fn delete(&self, run_id: RunId, section: &Section, key: &str) -> Result<bool>;
}

/// Handle scoping a [`DocumentStore`] to one run.
///
/// This is what task bodies and schedulers receive; it removes the need to
/// thread the run id through every store call.
#[derive(Clone)]
pub struct RunStoreHandle {
    store: Arc<dyn DocumentStore>,
    run_id: RunId,
}

impl RunStoreHandle {
    pub fn new(store: Arc<dyn DocumentStore>, run_id: RunId) -> Self {
        Self { store, run_id }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub async fn get(&self, section: &Section, key: &str) -> Result<Option<Value>> {
        self.store.get(self.run_id, section, key).await
    }

    pub async fn set(&self, section: &Section, key: &str, value: Value) -> Result<()> {
        self.store.set(self.run_id, section, key, value).await
    }

    pub async fn push(&self, section: &Section, key: &str, value: Value) -> Result<()> {
        self.store.push(self.run_id, section, key, value).await
    }

    pub async fn exists(&self, section: &Section, key: &str) -> Result<bool> {
        self.store.exists(self.run_id, section, key).await
    }

    pub async fn delete(&self, section: &Section, key: &str) -> Result<bool> {
        self.store.delete(self.run_id, section, key).await
    }
}
