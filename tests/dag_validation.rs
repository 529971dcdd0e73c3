// tests/dag_validation.rs

//! DAG blueprint validation: cycle rejection, edge endpoints, slot fan-out.

use lightflow::dag::{DagSpec, TaskNode};
use lightflow::errors::LightflowError;
use lightflow::task::{script, TaskAction};

fn noop() -> lightflow::task::TaskBody {
    script(|_scope| Ok(TaskAction::default()))
}

fn node(name: &str) -> TaskNode {
    TaskNode::new(name, noop())
}

#[test]
fn cycle_is_rejected_with_dag_cycle() {
    let spec = DagSpec::new("cyclic")
        .task(node("a"))
        .task(node("b"))
        .task(node("c"))
        .edge("a", "b")
        .edge("b", "c")
        .edge("c", "a");

    let err = spec.validate().unwrap_err();
    match err {
        LightflowError::DagCycle { dag, task } => {
            assert_eq!(dag, "cyclic");
            assert!(["a", "b", "c"].contains(&task.as_str()));
        }
        other => panic!("expected DagCycle, got {other:?}"),
    }
}

#[test]
fn self_edge_is_rejected() {
    let spec = DagSpec::new("selfish").task(node("a")).edge("a", "a");
    assert!(matches!(
        spec.validate().unwrap_err(),
        LightflowError::DagValidation { .. }
    ));
}

#[test]
fn undeclared_edge_endpoint_is_rejected() {
    let spec = DagSpec::new("dangling").task(node("a")).edge("a", "ghost");
    let err = spec.validate().unwrap_err();
    match err {
        LightflowError::DagValidation { dag, reason } => {
            assert_eq!(dag, "dangling");
            assert!(reason.contains("ghost"));
        }
        other => panic!("expected DagValidation, got {other:?}"),
    }
}

#[test]
fn empty_dag_is_rejected() {
    assert!(matches!(
        DagSpec::new("empty").validate().unwrap_err(),
        LightflowError::DagValidation { .. }
    ));
}

#[test]
fn duplicate_slot_edges_require_declared_fan_out() {
    let undeclared = DagSpec::new("fanout")
        .task(node("src"))
        .task(node("left"))
        .task(node("right"))
        .edge_slot("src", "left", "data")
        .edge_slot("src", "right", "data");
    assert!(matches!(
        undeclared.validate().unwrap_err(),
        LightflowError::DagValidation { .. }
    ));

    let mut fan_out_node = node("src");
    fan_out_node.fan_out = true;
    let declared = DagSpec::new("fanout")
        .task(fan_out_node)
        .task(node("left"))
        .task(node("right"))
        .edge_slot("src", "left", "data")
        .edge_slot("src", "right", "data");
    declared.validate().unwrap();
}

#[test]
fn valid_diamond_passes() {
    let spec = DagSpec::new("diamond")
        .task(node("a"))
        .task(node("b"))
        .task(node("c"))
        .task(node("d"))
        .edge("a", "b")
        .edge("a", "c")
        .edge("b", "d")
        .edge("c", "d");
    spec.validate().unwrap();
}
