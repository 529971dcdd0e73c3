// tests/scheduler_property.rs

//! Property tests for the DAG run state machine: every run terminates, and a
//! terminal run leaves every node in a terminal state.

use std::collections::HashSet;

use proptest::prelude::*;

use lightflow::dag::{DagOutcome, DagRunState, DagSpec, FailurePolicy, NodeState, TaskNode};
use lightflow::data::DataEnvelope;
use lightflow::task::{script, TaskAction, TaskRouting};

// Strategy to generate a valid DAG: task N may only depend on tasks 0..N,
// which makes the graph acyclic by construction.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = DagSpec> {
    (1..=max_tasks, any::<bool>()).prop_flat_map(|(num_tasks, lenient)| {
        let deps = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        );

        deps.prop_map(move |raw_deps| {
            let mut spec = DagSpec::new("generated").failure_policy(if lenient {
                FailurePolicy::Lenient
            } else {
                FailurePolicy::Strict
            });

            for i in 0..num_tasks {
                spec = spec.task(TaskNode::new(
                    format!("task_{}", i),
                    script(|_| Ok(TaskAction::default())),
                ));
            }

            for (i, potential) in raw_deps.into_iter().enumerate() {
                let mut seen = HashSet::new();
                for dep in potential {
                    if i > 0 && seen.insert(dep % i) {
                        spec = spec.edge(format!("task_{}", dep % i), format!("task_{}", i));
                    }
                }
            }

            spec
        })
    })
}

proptest! {
    #[test]
    fn every_run_terminates_with_all_nodes_terminal(
        spec in dag_strategy(10),
        failing in proptest::collection::vec(0..10usize, 0..4),
        skipping in proptest::collection::vec(0..10usize, 0..4),
    ) {
        prop_assert!(spec.validate().is_ok());

        let task_names: Vec<String> = spec.tasks.keys().cloned().collect();
        let failing: HashSet<String> = failing
            .iter()
            .filter(|i| **i < task_names.len())
            .map(|i| task_names[*i].clone())
            .collect();
        let skipping: HashSet<String> = skipping
            .iter()
            .filter(|i| **i < task_names.len())
            .map(|i| task_names[*i].clone())
            .collect();

        let mut state = DagRunState::new("generated", spec, None);
        let mut executing: Vec<(String, DataEnvelope)> = state.take_ready();

        let mut steps = 0;
        let max_steps = 1000;
        let outcome = loop {
            prop_assert!(steps < max_steps, "simulation did not terminate");
            steps += 1;

            if let Some(outcome) = state.poll_outcome() {
                break outcome;
            }
            prop_assert!(
                !executing.is_empty(),
                "no terminal outcome but nothing is executing"
            );

            let (task, _env) = executing.remove(0);
            if failing.contains(&task) {
                state.on_failed(&task, "task-body");
            } else {
                // Successful tasks may route a skip at some successors.
                let skips: Vec<String> = skipping.iter().cloned().collect();
                state.on_completed(
                    &task,
                    DataEnvelope::new(),
                    &TaskRouting::skipping(skips),
                    false,
                );
            }
            state.drain_skipped();
            executing.extend(state.take_ready());
        };

        // A terminal run leaves every node in a terminal state.
        for name in task_names {
            let node_state = state.node_state(&name).expect("node exists");
            prop_assert!(
                matches!(
                    node_state,
                    NodeState::Succeeded | NodeState::Failed | NodeState::Skipped
                ),
                "node {} ended non-terminal: {:?}",
                name,
                node_state
            );
        }

        // Any failure must surface as a failed outcome.
        if !failing.is_empty() {
            let failed_ran = state.first_failure().is_some();
            if failed_ran {
                let is_failed_outcome = matches!(outcome, DagOutcome::Failed { .. });
                prop_assert!(is_failed_outcome);
            }
        }
    }
}
