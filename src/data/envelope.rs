// src/data/envelope.rs

//! Typed, named slices of task output flowing along DAG edges.
//!
//! An envelope is an ordered list of named slices. Each slice carries an
//! opaque JSON payload, the history of tasks that touched it, and alternate
//! names (aliases) under which a task body may address it.
//!
//! Envelopes fork when a task has multiple outgoing edges and merge on fan-in,
//! concatenating the parent envelopes in parent order. Slot names are unique
//! within one envelope; a clash on merge is disambiguated by prefixing the
//! slot with the parent task name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{LightflowError, Result};

/// One named slice of data travelling along a DAG edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSlice {
    /// Slot name, unique within an envelope.
    pub slot: String,

    /// Opaque serialized payload.
    pub payload: Value,

    /// Names of the tasks that touched this slice, oldest first. Append-only.
    pub history: Vec<String>,

    /// Alternate names under which this slice can be addressed.
    pub aliases: Vec<String>,
}

impl DataSlice {
    pub fn new(slot: impl Into<String>, payload: Value) -> Self {
        Self {
            slot: slot.into(),
            payload,
            history: Vec::new(),
            aliases: Vec::new(),
        }
    }

    /// Returns true if `name` addresses this slice, either as its slot or as
    /// one of its aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.slot == name || self.aliases.iter().any(|a| a == name)
    }
}

/// The ordered collection of slices delivered to a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataEnvelope {
    slices: Vec<DataSlice>,
}

impl DataEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for a single-slice envelope.
    pub fn from_value(slot: impl Into<String>, payload: Value) -> Self {
        Self {
            slices: vec![DataSlice::new(slot, payload)],
        }
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn slices(&self) -> impl Iterator<Item = &DataSlice> {
        self.slices.iter()
    }

    /// Append a slice. Slot names must stay unique within the envelope.
    pub fn push(&mut self, slice: DataSlice) -> Result<()> {
        if self.slices.iter().any(|s| s.slot == slice.slot) {
            return Err(LightflowError::DataRouting(format!(
                "duplicate slot '{}' in envelope",
                slice.slot
            )));
        }
        self.slices.push(slice);
        Ok(())
    }

    /// Look up a slice by slot name or alias.
    pub fn get(&self, name: &str) -> Option<&DataSlice> {
        self.slices.iter().find(|s| s.answers_to(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DataSlice> {
        self.slices.iter_mut().find(|s| s.answers_to(name))
    }

    /// Payload of the slice addressed by `name`, if present.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|s| &s.payload)
    }

    /// Set the payload of the slot, creating the slice if it does not exist.
    ///
    /// This is the usual write path for task bodies producing output.
    pub fn set_value(&mut self, slot: impl Into<String>, payload: Value) {
        let slot = slot.into();
        match self.get_mut(&slot) {
            Some(slice) => slice.payload = payload,
            None => self.slices.push(DataSlice::new(slot, payload)),
        }
    }

    /// Copy of this envelope for propagation along one of several outgoing
    /// edges. Payloads are JSON values, so the copy is structural; slices
    /// diverge independently from here on.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Record that `task` touched every slice of this envelope.
    pub fn append_history(&mut self, task: &str) {
        for slice in &mut self.slices {
            slice.history.push(task.to_string());
        }
    }

    /// An envelope containing only the slice carried by an edge with a slot
    /// label, or `None` if the parent never produced that slot.
    pub fn restricted_to(&self, slot: &str) -> Option<Self> {
        self.get(slot).map(|slice| Self {
            slices: vec![slice.clone()],
        })
    }

    /// Merge parent envelopes on fan-in, preserving parent order.
    ///
    /// A slot name already claimed by an earlier parent is renamed to
    /// `<parent>.<slot>`; aliases keep addressing the renamed slice.
    pub fn merge(parents: Vec<(String, DataEnvelope)>) -> Self {
        let mut merged = DataEnvelope::new();

        for (parent, envelope) in parents {
            for mut slice in envelope.slices {
                if merged.slices.iter().any(|s| s.slot == slice.slot) {
                    let renamed = format!("{}.{}", parent, slice.slot);
                    tracing::debug!(
                        slot = %slice.slot,
                        renamed = %renamed,
                        parent = %parent,
                        "slot clash on fan-in; prefixing with parent name"
                    );
                    slice.slot = renamed;
                }
                merged.slices.push(slice);
            }
        }

        merged
    }

    /// Apply a task's input alias map to produce the body-facing view.
    ///
    /// An empty alias map passes the whole envelope through unchanged. A
    /// non-empty map restricts the view to the named slots, in map order, and
    /// registers each alias on its slice.
    ///
    /// Fails with `UnknownAlias` when the map references a slot this envelope
    /// does not carry, and with `EmptyInput` when `require_input` is set and
    /// nothing was delivered.
    pub fn select_for_task(
        &self,
        task: &str,
        aliases: &BTreeMap<String, String>,
        require_input: bool,
    ) -> Result<DataEnvelope> {
        if require_input && self.is_empty() {
            return Err(LightflowError::EmptyInput(task.to_string()));
        }

        if aliases.is_empty() {
            return Ok(self.clone());
        }

        let mut view = DataEnvelope::new();
        for (alias, slot) in aliases {
            let slice = self.get(slot).ok_or_else(|| LightflowError::UnknownAlias {
                task: task.to_string(),
                alias: alias.clone(),
            })?;

            let mut slice = slice.clone();
            if !slice.answers_to(alias) {
                slice.aliases.push(alias.clone());
            }
            // The same slot may be requested under two aliases; collapse onto
            // the already-selected slice instead of duplicating it.
            match view.get_mut(&slice.slot) {
                Some(existing) => {
                    if !existing.answers_to(alias) {
                        existing.aliases.push(alias.clone());
                    }
                }
                None => view.slices.push(slice),
            }
        }

        Ok(view)
    }
}
