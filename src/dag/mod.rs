// src/dag/mod.rs

pub mod graph;
pub mod scheduler;
pub mod spec;
pub mod state;

pub use graph::DagGraph;
pub use scheduler::DagScheduler;
pub use spec::{DagSpec, Edge, FailurePolicy, RetryPolicy, TaskNode};
pub use state::{DagOutcome, DagRunState, NodeState};
