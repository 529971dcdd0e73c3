// src/store/memory.rs

//! In-process document store.
//!
//! Backs the embedded engine and the test suite. One map per run document;
//! keys are `<section prefix>/<key>` strings. All operations take the store
//! mutex for the duration of one key access, which gives the per-key
//! atomicity the store contract asks for.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::errors::{LightflowError, Result};
use crate::store::{DocumentStore, Section};
use crate::types::RunId;

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<RunId, HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(section: &Section, key: &str) -> String {
        format!("{}/{}", section.prefix(), key)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_doc(&self, run_id: RunId) -> Result<()> {
        let mut docs = self.docs.lock().unwrap();
        docs.entry(run_id).or_default();
        debug!(run_id = %run_id, "created run document");
        Ok(())
    }

    async fn remove_doc(&self, run_id: RunId) -> Result<()> {
        let mut docs = self.docs.lock().unwrap();
        docs.remove(&run_id);
        debug!(run_id = %run_id, "removed run document");
        Ok(())
    }

    async fn doc_exists(&self, run_id: RunId) -> Result<bool> {
        Ok(self.docs.lock().unwrap().contains_key(&run_id))
    }

    async fn get(&self, run_id: RunId, section: &Section, key: &str) -> Result<Option<Value>> {
        let docs = self.docs.lock().unwrap();
        let doc = docs
            .get(&run_id)
            .ok_or_else(|| LightflowError::StoreUnavailable(format!("no document for run {}", run_id)))?;
        Ok(doc.get(&Self::full_key(section, key)).cloned())
    }

    async fn set(&self, run_id: RunId, section: &Section, key: &str, value: Value) -> Result<()> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(&run_id)
            .ok_or_else(|| LightflowError::StoreUnavailable(format!("no document for run {}", run_id)))?;
        doc.insert(Self::full_key(section, key), value);
        Ok(())
    }

    async fn push(&self, run_id: RunId, section: &Section, key: &str, value: Value) -> Result<()> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(&run_id)
            .ok_or_else(|| LightflowError::StoreUnavailable(format!("no document for run {}", run_id)))?;

        let entry = doc
            .entry(Self::full_key(section, key))
            .or_insert_with(|| Value::Array(Vec::new()));

        match entry {
            Value::Array(items) => {
                items.push(value);
                Ok(())
            }
            _ => Err(LightflowError::DataRouting(format!(
                "key '{}/{}' holds a non-list value; cannot push",
                section.prefix(),
                key
            ))),
        }
    }

    async fn exists(&self, run_id: RunId, section: &Section, key: &str) -> Result<bool> {
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .get(&run_id)
            .map(|doc| doc.contains_key(&Self::full_key(section, key)))
            .unwrap_or(false))
    }

    async fn delete(&self, run_id: RunId, section: &Section, key: &str) -> Result<bool> {
        let mut docs = self.docs.lock().unwrap();
        Ok(docs
            .get_mut(&run_id)
            .map(|doc| doc.remove(&Self::full_key(section, key)).is_some())
            .unwrap_or(false))
    }
}
