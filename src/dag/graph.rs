// src/dag/graph.rs

//! In-memory adjacency view of a validated DAG blueprint.
//!
//! Acyclicity and edge endpoints are checked in [`DagSpec::validate`]; here
//! we only keep adjacency information for scheduling and diagnostics.

use std::collections::HashMap;

use crate::dag::spec::DagSpec;

/// Internal node structure: immediate parents and children with the slot
/// label of the connecting edge.
#[derive(Debug, Clone, Default)]
struct GraphNode {
    parents: Vec<(String, Option<String>)>,
    children: Vec<(String, Option<String>)>,
}

#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: HashMap<String, GraphNode>,
}

impl DagGraph {
    /// Build the adjacency view from a validated [`DagSpec`].
    pub fn from_spec(spec: &DagSpec) -> Self {
        let mut nodes: HashMap<String, GraphNode> = HashMap::new();

        for name in spec.tasks.keys() {
            nodes.insert(name.clone(), GraphNode::default());
        }

        for edge in &spec.edges {
            if let Some(node) = nodes.get_mut(&edge.from) {
                node.children.push((edge.to.clone(), edge.slot.clone()));
            }
            if let Some(node) = nodes.get_mut(&edge.to) {
                node.parents.push((edge.from.clone(), edge.slot.clone()));
            }
        }

        Self { nodes }
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Immediate parents of a task, in declared edge order.
    pub fn parents_of(&self, name: &str) -> &[(String, Option<String>)] {
        self.nodes
            .get(name)
            .map(|n| n.parents.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate children of a task, in declared edge order.
    pub fn children_of(&self, name: &str) -> &[(String, Option<String>)] {
        self.nodes
            .get(name)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn in_degree(&self, name: &str) -> usize {
        self.parents_of(name).len()
    }

    /// Tasks with no parents.
    pub fn roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parents.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        roots.sort();
        roots
    }

    /// Tasks with no children.
    pub fn leaves(&self) -> Vec<String> {
        let mut leaves: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.children.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        leaves.sort();
        leaves
    }
}
