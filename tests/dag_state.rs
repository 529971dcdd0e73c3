// tests/dag_state.rs

//! Unit tests for the pure DAG run state machine: dispatch order, data
//! propagation, skip cascades, failure policies, stop and abort.

use serde_json::json;

use lightflow::dag::{DagOutcome, DagRunState, DagSpec, FailurePolicy, NodeState, TaskNode};
use lightflow::data::DataEnvelope;
use lightflow::task::{script, TaskAction, TaskBody, TaskRouting};

fn noop() -> TaskBody {
    script(|_scope| Ok(TaskAction::default()))
}

fn node(name: &str) -> TaskNode {
    TaskNode::new(name, noop())
}

fn names(ready: &[(String, DataEnvelope)]) -> Vec<&str> {
    ready.iter().map(|(name, _)| name.as_str()).collect()
}

fn complete(state: &mut DagRunState, task: &str, envelope: DataEnvelope) {
    state.on_completed(task, envelope, &TaskRouting::all(), false);
}

#[test]
fn linear_chain_dispatches_in_dependency_order() {
    let spec = DagSpec::new("main")
        .task(node("a"))
        .task(node("b"))
        .edge("a", "b");
    let mut state = DagRunState::new("main", spec, None);

    let first = state.take_ready();
    assert_eq!(names(&first), vec!["a"]);
    assert!(state.poll_outcome().is_none());

    complete(&mut state, "a", DataEnvelope::new());
    let second = state.take_ready();
    assert_eq!(names(&second), vec!["b"]);

    complete(&mut state, "b", DataEnvelope::new());
    assert_eq!(
        state.poll_outcome(),
        Some(DagOutcome::Completed { stopped: false })
    );
    assert_eq!(state.node_state("a"), Some(NodeState::Succeeded));
    assert_eq!(state.node_state("b"), Some(NodeState::Succeeded));
}

#[test]
fn slot_edges_restrict_delivery_and_fan_in_merges_in_parent_order() {
    let mut src = node("a");
    src.fan_out = true;
    let spec = DagSpec::new("main")
        .task(src)
        .task(node("b"))
        .task(node("c"))
        .task(node("d"))
        .edge_slot("a", "b", "x")
        .edge_slot("a", "c", "y")
        .edge("b", "d")
        .edge("c", "d");
    let mut state = DagRunState::new("main", spec, None);

    assert_eq!(names(&state.take_ready()), vec!["a"]);

    let mut output = DataEnvelope::new();
    output.set_value("x", json!(1));
    output.set_value("y", json!(2));
    complete(&mut state, "a", output);

    let branches = state.take_ready();
    assert_eq!(branches.len(), 2);
    for (name, envelope) in &branches {
        match name.as_str() {
            "b" => {
                assert_eq!(envelope.len(), 1);
                assert_eq!(envelope.value("x"), Some(&json!(1)));
            }
            "c" => {
                assert_eq!(envelope.len(), 1);
                assert_eq!(envelope.value("y"), Some(&json!(2)));
            }
            other => panic!("unexpected ready task {other}"),
        }
    }

    // Complete the branches out of declared order; the join still merges
    // its inputs in declared parent order (b before c).
    let (c_env, b_env) = {
        let mut iter = branches.into_iter();
        let first = iter.next().unwrap();
        let second = iter.next().unwrap();
        if first.0 == "c" {
            (first.1, second.1)
        } else {
            (second.1, first.1)
        }
    };
    complete(&mut state, "c", c_env);
    complete(&mut state, "b", b_env);

    let join = state.take_ready();
    assert_eq!(names(&join), vec!["d"]);
    let (_, merged) = &join[0];
    let slots: Vec<&str> = merged.slices().map(|s| s.slot.as_str()).collect();
    assert_eq!(slots, vec!["x", "y"]);

    complete(&mut state, "d", DataEnvelope::new());
    assert_eq!(
        state.poll_outcome(),
        Some(DagOutcome::Completed { stopped: false })
    );
}

#[test]
fn routing_skip_cascades_to_descendants_without_live_parents() {
    // a -> b -> c, a -> d; a skips b. b and c are skipped, d still runs.
    let spec = DagSpec::new("main")
        .task(node("a"))
        .task(node("b"))
        .task(node("c"))
        .task(node("d"))
        .edge("a", "b")
        .edge("b", "c")
        .edge("a", "d");
    let mut state = DagRunState::new("main", spec, None);

    state.take_ready();
    state.on_completed(
        "a",
        DataEnvelope::new(),
        &TaskRouting::skipping(["b"]),
        false,
    );

    assert_eq!(state.node_state("b"), Some(NodeState::Skipped));
    assert_eq!(state.node_state("c"), Some(NodeState::Skipped));
    assert_eq!(state.drain_skipped(), vec!["b".to_string(), "c".to_string()]);

    assert_eq!(names(&state.take_ready()), vec!["d"]);
    complete(&mut state, "d", DataEnvelope::new());
    assert_eq!(
        state.poll_outcome(),
        Some(DagOutcome::Completed { stopped: false })
    );
}

#[test]
fn descendant_with_live_parent_survives_a_skipped_branch() {
    // a -> b -> d, a -> c -> d; b is skipped but d still runs via c.
    let spec = DagSpec::new("main")
        .task(node("a"))
        .task(node("b"))
        .task(node("c"))
        .task(node("d"))
        .edge("a", "b")
        .edge("a", "c")
        .edge("b", "d")
        .edge("c", "d");
    let mut state = DagRunState::new("main", spec, None);

    state.take_ready();
    state.on_completed(
        "a",
        DataEnvelope::new(),
        &TaskRouting::skipping(["b"]),
        false,
    );

    assert_eq!(state.node_state("b"), Some(NodeState::Skipped));
    assert_eq!(names(&state.take_ready()), vec!["c"]);

    complete(&mut state, "c", DataEnvelope::new());
    assert_eq!(names(&state.take_ready()), vec!["d"]);

    complete(&mut state, "d", DataEnvelope::new());
    assert_eq!(
        state.poll_outcome(),
        Some(DagOutcome::Completed { stopped: false })
    );
}

#[test]
fn limit_routing_skips_unlisted_children() {
    let spec = DagSpec::new("main")
        .task(node("branch"))
        .task(node("lane1"))
        .task(node("lane2"))
        .task(node("lane3"))
        .edge("branch", "lane1")
        .edge("branch", "lane2")
        .edge("branch", "lane3");
    let mut state = DagRunState::new("main", spec, None);

    state.take_ready();
    state.on_completed(
        "branch",
        DataEnvelope::new(),
        &TaskRouting::limit_to(["lane1", "lane2"]),
        false,
    );

    assert_eq!(state.node_state("lane3"), Some(NodeState::Skipped));
    let ready = state.take_ready();
    let mut ready_names = names(&ready);
    ready_names.sort();
    assert_eq!(ready_names, vec!["lane1", "lane2"]);
}

#[test]
fn strict_failure_stops_dispatch_and_fails_the_dag() {
    let spec = DagSpec::new("main")
        .task(node("a"))
        .task(node("b"))
        .task(node("c"))
        .edge("a", "b")
        .edge("b", "c");
    let mut state = DagRunState::new("main", spec, None);

    state.take_ready();
    complete(&mut state, "a", DataEnvelope::new());
    state.take_ready();
    state.on_failed("b", "task-body");

    assert!(state.is_stopping());
    assert!(state.take_ready().is_empty());
    assert_eq!(state.poll_outcome(), Some(DagOutcome::Failed { aborted: false }));

    assert_eq!(state.node_state("b"), Some(NodeState::Failed));
    assert_eq!(state.node_state("c"), Some(NodeState::Skipped));
    assert_eq!(
        state.first_failure(),
        Some(&("b".to_string(), "task-body".to_string()))
    );
}

#[test]
fn lenient_failure_skips_descendants_and_runs_the_rest() {
    // a -> b -> c and a -> d; b fails but d still runs.
    let spec = DagSpec::new("main")
        .failure_policy(FailurePolicy::Lenient)
        .task(node("a"))
        .task(node("b"))
        .task(node("c"))
        .task(node("d"))
        .edge("a", "b")
        .edge("b", "c")
        .edge("a", "d");
    let mut state = DagRunState::new("main", spec, None);

    state.take_ready();
    complete(&mut state, "a", DataEnvelope::new());
    let ready = state.take_ready();
    let mut ready_names = names(&ready);
    ready_names.sort();
    assert_eq!(ready_names, vec!["b", "d"]);

    state.on_failed("b", "task-body");
    assert!(!state.is_stopping());
    assert_eq!(state.node_state("c"), Some(NodeState::Skipped));

    complete(&mut state, "d", DataEnvelope::new());
    assert_eq!(state.poll_outcome(), Some(DagOutcome::Failed { aborted: false }));
    assert_eq!(state.node_state("d"), Some(NodeState::Succeeded));
}

#[test]
fn stop_request_drains_in_flight_and_sweeps_the_rest() {
    let spec = DagSpec::new("main")
        .task(node("a"))
        .task(node("b"))
        .edge("a", "b");
    let mut state = DagRunState::new("main", spec, None);

    state.take_ready();
    state.request_stop();

    // The in-flight task drains naturally; nothing new dispatches.
    assert!(state.poll_outcome().is_none());
    complete(&mut state, "a", DataEnvelope::new());
    assert!(state.take_ready().is_empty());

    assert_eq!(
        state.poll_outcome(),
        Some(DagOutcome::Completed { stopped: true })
    );
    assert_eq!(state.node_state("a"), Some(NodeState::Succeeded));
    assert_eq!(state.node_state("b"), Some(NodeState::Skipped));
}

#[test]
fn abort_is_terminal_without_draining() {
    let spec = DagSpec::new("main")
        .task(node("a"))
        .task(node("b"))
        .edge("a", "b");
    let mut state = DagRunState::new("main", spec, None);

    state.take_ready();
    state.abort();

    assert_eq!(state.poll_outcome(), Some(DagOutcome::Failed { aborted: true }));
    assert_eq!(state.node_state("a"), Some(NodeState::Skipped));
    assert_eq!(state.node_state("b"), Some(NodeState::Skipped));
}

#[test]
fn stop_dag_completion_counts_as_stopped_success() {
    let spec = DagSpec::new("main")
        .task(node("a"))
        .task(node("b"))
        .edge("a", "b");
    let mut state = DagRunState::new("main", spec, None);

    state.take_ready();
    state.on_completed("a", DataEnvelope::new(), &TaskRouting::all(), true);

    assert!(state.take_ready().is_empty());
    assert_eq!(
        state.poll_outcome(),
        Some(DagOutcome::Completed { stopped: true })
    );
    assert_eq!(state.node_state("a"), Some(NodeState::Succeeded));
}

#[test]
fn force_run_node_ignores_skip_requests() {
    let mut forced = node("b");
    forced.force_run = true;
    let spec = DagSpec::new("main")
        .task(node("a"))
        .task(forced)
        .edge("a", "b");
    let mut state = DagRunState::new("main", spec, None);

    state.take_ready();
    state.on_completed(
        "a",
        DataEnvelope::new(),
        &TaskRouting::skipping(["b"]),
        false,
    );

    assert_eq!(names(&state.take_ready()), vec!["b"]);
}

#[test]
fn propagate_skip_false_absorbs_the_cascade() {
    // a -> b -> c; b absorbs skips, so skipping b leaves c runnable.
    let mut absorbing = node("b");
    absorbing.propagate_skip = false;
    let spec = DagSpec::new("main")
        .task(node("a"))
        .task(absorbing)
        .task(node("c"))
        .edge("a", "b")
        .edge("b", "c");
    let mut state = DagRunState::new("main", spec, None);

    state.take_ready();
    state.on_completed(
        "a",
        DataEnvelope::new(),
        &TaskRouting::skipping(["b"]),
        false,
    );

    assert_eq!(state.node_state("b"), Some(NodeState::Skipped));
    assert_eq!(names(&state.take_ready()), vec!["c"]);
}

#[test]
fn initial_envelope_reaches_the_roots() {
    let spec = DagSpec::new("sub").task(node("only"));
    let mut env = DataEnvelope::new();
    env.set_value("seed", json!(42));

    let mut state = DagRunState::new("sub", spec, Some(env));
    let ready = state.take_ready();
    assert_eq!(names(&ready), vec!["only"]);
    assert_eq!(ready[0].1.value("seed"), Some(&json!(42)));
}
