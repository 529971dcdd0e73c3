// src/dag/state.rs

//! Pure state machine for one DAG run.
//!
//! This is a synchronous, deterministic core: it consumes task outcomes and
//! produces the set of tasks to dispatch next, without channels, IO or time.
//! The async shell ([`crate::dag::scheduler`]) feeds it signals from the bus
//! and submits the ready tasks as jobs.
//!
//! Node lifecycle: `Pending` until every parent settled, then `Ready`,
//! `Running` once dispatched, and finally one of `Succeeded`, `Failed`,
//! `Skipped`. A run is terminal when no node is pending, ready or running.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::dag::graph::DagGraph;
use crate::dag::spec::{DagSpec, FailurePolicy};
use crate::data::DataEnvelope;
use crate::task::TaskRouting;

/// Per-run state of a task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Succeeded | NodeState::Failed | NodeState::Skipped
        )
    }
}

/// Terminal outcome of a DAG run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagOutcome {
    Completed { stopped: bool },
    Failed { aborted: bool },
}

#[derive(Debug)]
struct NodeRun {
    state: NodeState,
    /// Parents that have not settled their edge yet.
    pending_parents: usize,
    /// Parents that delivered data (or succeeded with an empty delivery).
    live_inputs: usize,
    /// Parents that want this node skipped.
    skip_votes: usize,
    /// Named as a skip target by a routing decision.
    explicit_skip: bool,
    /// Accumulated parent envelopes, in arrival order.
    inputs: Vec<(String, DataEnvelope)>,
}

impl NodeRun {
    fn new(pending_parents: usize) -> Self {
        Self {
            state: NodeState::Pending,
            pending_parents,
            live_inputs: 0,
            skip_votes: 0,
            explicit_skip: false,
            inputs: Vec::new(),
        }
    }
}

/// State of one DAG run, owned by the DAG scheduler for its duration.
pub struct DagRunState {
    /// Instance name of this DAG run.
    dag: String,
    spec: DagSpec,
    graph: DagGraph,
    nodes: HashMap<String, NodeRun>,

    /// Nodes in the order they became ready.
    ready_queue: VecDeque<String>,
    /// Newly skipped nodes, drained by the shell to publish `task-skipped`.
    skipped_events: Vec<String>,

    in_flight: usize,
    stopping: bool,
    stop_flagged: bool,
    failed: bool,
    aborted: bool,
    first_failure: Option<(String, String)>,
}

impl DagRunState {
    /// Initialise the run: roots become ready, everything else pending with
    /// its in-degree as the parent counter. An initial envelope (from a
    /// `run-dag` request) is delivered to every root.
    pub fn new(dag: impl Into<String>, spec: DagSpec, initial: Option<DataEnvelope>) -> Self {
        let dag = dag.into();
        let graph = DagGraph::from_spec(&spec);

        let mut nodes = HashMap::new();
        for name in spec.tasks.keys() {
            nodes.insert(name.clone(), NodeRun::new(graph.in_degree(name)));
        }

        let mut state = Self {
            dag: dag.clone(),
            spec,
            graph,
            nodes,
            ready_queue: VecDeque::new(),
            skipped_events: Vec::new(),
            in_flight: 0,
            stopping: false,
            stop_flagged: false,
            failed: false,
            aborted: false,
            first_failure: None,
        };

        for root in state.graph.roots() {
            if let Some(env) = &initial {
                if let Some(node) = state.nodes.get_mut(&root) {
                    node.inputs.push((dag.clone(), env.fork()));
                    node.live_inputs += 1;
                }
            }
            state.mark_ready(&root);
        }

        state
    }

    pub fn dag_name(&self) -> &str {
        &self.dag
    }

    pub fn spec(&self) -> &DagSpec {
        &self.spec
    }

    pub fn node_state(&self, name: &str) -> Option<NodeState> {
        self.nodes.get(name).map(|n| n.state)
    }

    pub fn first_failure(&self) -> Option<&(String, String)> {
        self.first_failure.as_ref()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Pop the tasks to dispatch now, in the order they became ready, with
    /// their merged input envelopes. Dispatching is suppressed while a stop
    /// or abort is in effect.
    pub fn take_ready(&mut self) -> Vec<(String, DataEnvelope)> {
        if self.stopping || self.aborted {
            return Vec::new();
        }

        let mut out = Vec::new();
        while let Some(name) = self.ready_queue.pop_front() {
            let inputs = match self.nodes.get_mut(&name) {
                Some(node) if node.state == NodeState::Ready => {
                    node.state = NodeState::Running;
                    std::mem::take(&mut node.inputs)
                }
                // Skipped after becoming ready; leave it to the sweep.
                _ => continue,
            };

            self.in_flight += 1;
            let envelope = self.merge_inputs(&name, inputs);
            debug!(dag = %self.dag, task = %name, "dispatching ready task");
            out.push((name, envelope));
        }
        out
    }

    /// Merge accumulated parent envelopes preserving declared parent order.
    fn merge_inputs(&self, name: &str, mut inputs: Vec<(String, DataEnvelope)>) -> DataEnvelope {
        let parents = self.graph.parents_of(name);
        let position = |parent: &str| {
            parents
                .iter()
                .position(|(p, _)| p == parent)
                .unwrap_or(usize::MAX)
        };
        inputs.sort_by_key(|(parent, _)| position(parent));
        DataEnvelope::merge(inputs)
    }

    /// Record a successful task completion and propagate its output.
    pub fn on_completed(
        &mut self,
        task: &str,
        envelope: DataEnvelope,
        routing: &TaskRouting,
        stop_dag: bool,
    ) {
        match self.nodes.get_mut(task) {
            Some(node) if node.state == NodeState::Running => {
                node.state = NodeState::Succeeded;
                self.in_flight = self.in_flight.saturating_sub(1);
            }
            Some(node) => {
                // Re-delivery after a lease expiry can complete a task twice.
                warn!(
                    dag = %self.dag,
                    task = %task,
                    state = ?node.state,
                    "completion for task not in Running state; ignoring"
                );
                return;
            }
            None => {
                warn!(dag = %self.dag, task = %task, "completion for unknown task; ignoring");
                return;
            }
        }

        let children: Vec<(String, Option<String>)> = self.graph.children_of(task).to_vec();
        for (child, slot) in children {
            if routing.suppresses(&child) {
                self.settle_edge(&child, None, false);
                self.skip_target(&child);
                continue;
            }

            let delivery = match &slot {
                Some(slot) => match envelope.restricted_to(slot) {
                    Some(env) => env,
                    None => {
                        warn!(
                            dag = %self.dag,
                            task = %task,
                            child = %child,
                            slot = %slot,
                            "edge slot missing from task output; delivering empty envelope"
                        );
                        DataEnvelope::new()
                    }
                },
                None => envelope.fork(),
            };
            self.settle_edge(&child, Some((task.to_string(), delivery)), false);
        }

        for target in &routing.skip {
            self.skip_target(target);
        }

        if stop_dag {
            debug!(dag = %self.dag, task = %task, "task requested DAG stop");
            self.stopping = true;
            self.stop_flagged = true;
        }
    }

    /// Record a task failure and apply the failure policy.
    pub fn on_failed(&mut self, task: &str, kind: &str) {
        match self.nodes.get_mut(task) {
            Some(node) if node.state == NodeState::Running => {
                node.state = NodeState::Failed;
                self.in_flight = self.in_flight.saturating_sub(1);
            }
            Some(node) => {
                warn!(
                    dag = %self.dag,
                    task = %task,
                    state = ?node.state,
                    "failure for task not in Running state; ignoring"
                );
                return;
            }
            None => {
                warn!(dag = %self.dag, task = %task, "failure for unknown task; ignoring");
                return;
            }
        }

        self.failed = true;
        if self.first_failure.is_none() {
            self.first_failure = Some((task.to_string(), kind.to_string()));
        }

        match self.spec.failure_policy {
            FailurePolicy::Strict => {
                warn!(dag = %self.dag, task = %task, kind, "task failed; stopping DAG (strict policy)");
                self.stopping = true;
            }
            FailurePolicy::Lenient => {
                warn!(dag = %self.dag, task = %task, kind, "task failed; skipping descendants (lenient policy)");
                let children: Vec<(String, Option<String>)> =
                    self.graph.children_of(task).to_vec();
                for (child, _slot) in children {
                    self.settle_edge(&child, None, true);
                }
            }
        }
    }

    /// Record a skip reported from outside the state machine.
    pub fn on_skipped(&mut self, task: &str) {
        self.skip_target(task);
    }

    /// Co-operative stop: no new dispatch, in-flight tasks drain naturally.
    pub fn request_stop(&mut self) {
        if !self.stopping {
            debug!(dag = %self.dag, "stop requested; draining in-flight tasks");
        }
        self.stopping = true;
        self.stop_flagged = true;
    }

    /// Abort: terminal immediately, in-flight tasks are orphaned.
    pub fn abort(&mut self) {
        warn!(dag = %self.dag, "abort requested; terminating without draining");
        self.aborted = true;
        self.stopping = true;
    }

    /// Newly skipped nodes since the last call.
    pub fn drain_skipped(&mut self) -> Vec<String> {
        std::mem::take(&mut self.skipped_events)
    }

    /// Check for a terminal outcome, sweeping undispatched nodes to
    /// `Skipped` when the run is winding down.
    pub fn poll_outcome(&mut self) -> Option<DagOutcome> {
        if self.aborted {
            self.sweep_non_terminal();
            self.in_flight = 0;
            return Some(DagOutcome::Failed { aborted: true });
        }

        if self.in_flight > 0 {
            return None;
        }

        if self.stopping {
            self.sweep_non_terminal();
            return Some(if self.failed {
                DagOutcome::Failed { aborted: false }
            } else {
                DagOutcome::Completed {
                    stopped: self.stop_flagged,
                }
            });
        }

        let all_terminal = self.nodes.values().all(|n| n.state.is_terminal());
        if !all_terminal {
            return None;
        }

        Some(if self.failed {
            DagOutcome::Failed { aborted: false }
        } else {
            DagOutcome::Completed { stopped: false }
        })
    }

    fn mark_ready(&mut self, name: &str) {
        if let Some(node) = self.nodes.get_mut(name) {
            if node.state == NodeState::Pending {
                node.state = NodeState::Ready;
                self.ready_queue.push_back(name.to_string());
            }
        }
    }

    /// Settle one incoming edge of `child`: decrement the parent counter,
    /// record a delivery or a skip vote, and resolve the node's fate once
    /// every parent settled.
    fn settle_edge(
        &mut self,
        child: &str,
        delivery: Option<(String, DataEnvelope)>,
        skip_vote: bool,
    ) {
        let Some(node) = self.nodes.get_mut(child) else {
            warn!(dag = %self.dag, task = %child, "edge settles into unknown task; ignoring");
            return;
        };
        if node.state.is_terminal() {
            return;
        }

        node.pending_parents = node.pending_parents.saturating_sub(1);
        if let Some((parent, envelope)) = delivery {
            node.inputs.push((parent, envelope));
            node.live_inputs += 1;
        }
        if skip_vote {
            node.skip_votes += 1;
        }

        self.maybe_resolve(child);
    }

    /// Decide the fate of a node once all parents settled.
    ///
    /// A node runs when at least one live parent delivered to it, or when it
    /// is forced; it is skipped when it was explicitly targeted or when the
    /// only word from its parents was a propagated skip.
    fn maybe_resolve(&mut self, name: &str) {
        let Some(node) = self.nodes.get(name) else {
            return;
        };
        if node.state != NodeState::Pending || node.pending_parents > 0 {
            return;
        }

        let force_run = self
            .spec
            .tasks
            .get(name)
            .map(|t| t.force_run)
            .unwrap_or(false);

        let skip = !force_run
            && (node.explicit_skip || (node.live_inputs == 0 && node.skip_votes > 0));

        if skip {
            self.mark_skipped(name);
        } else {
            self.mark_ready(name);
        }
    }

    /// Apply an explicit skip request to a node.
    pub(crate) fn skip_target(&mut self, name: &str) {
        let force_run = self
            .spec
            .tasks
            .get(name)
            .map(|t| t.force_run)
            .unwrap_or(false);

        let Some(node) = self.nodes.get_mut(name) else {
            warn!(dag = %self.dag, task = %name, "skip targets unknown task; ignoring");
            return;
        };

        if force_run {
            debug!(dag = %self.dag, task = %name, "skip target is force-run; ignoring skip");
            return;
        }

        match node.state {
            NodeState::Pending => {
                // Remember the skip; the node settles it once all parents
                // reported, so a still-running parent cannot resurrect it.
                node.explicit_skip = true;
                self.maybe_resolve(name);
            }
            NodeState::Ready => {
                self.mark_skipped(name);
            }
            NodeState::Running | NodeState::Succeeded | NodeState::Failed | NodeState::Skipped => {
                debug!(
                    dag = %self.dag,
                    task = %name,
                    state = ?node.state,
                    "skip target already dispatched or terminal; ignoring"
                );
            }
        }
    }

    /// Mark a node skipped and cascade to its children.
    fn mark_skipped(&mut self, name: &str) {
        let propagate = self
            .spec
            .tasks
            .get(name)
            .map(|t| t.propagate_skip)
            .unwrap_or(true);

        if let Some(node) = self.nodes.get_mut(name) {
            node.state = NodeState::Skipped;
        }
        debug!(dag = %self.dag, task = %name, propagate, "task skipped");
        self.skipped_events.push(name.to_string());

        let children: Vec<(String, Option<String>)> = self.graph.children_of(name).to_vec();
        for (child, _slot) in children {
            self.settle_edge(&child, None, propagate);
        }
    }

    /// Sweep every node that never dispatched into `Skipped` so a terminal
    /// run leaves each node in a terminal state.
    fn sweep_non_terminal(&mut self) {
        let names: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| !n.state.is_terminal())
            .map(|(name, _)| name.clone())
            .collect();

        for name in names {
            if let Some(node) = self.nodes.get_mut(&name) {
                debug!(dag = %self.dag, task = %name, state = ?node.state, "sweeping undone task to Skipped");
                node.state = NodeState::Skipped;
                self.skipped_events.push(name);
            }
        }
        self.ready_queue.clear();
    }
}
