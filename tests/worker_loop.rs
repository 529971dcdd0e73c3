// tests/worker_loop.rs

//! Worker behaviour: introspection queries, graceful stop, dead-lettering,
//! and independence of repeated submissions.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;

use lightflow::dag::{DagSpec, TaskNode};
use lightflow::queue::{JobKind, JobRecord};
use lightflow::signal::{QueryReply, QueryRequest, SignalBody};
use lightflow::store::Section;
use lightflow::types::{RunId, RunState};
use lightflow::workflow::WorkflowSpec;
use lightflow_test_utils::bodies::{new_log, record};
use lightflow_test_utils::harness::HarnessBuilder;
use lightflow_test_utils::{init_tracing, with_timeout};

fn single_task_workflow(name: &str, log: lightflow_test_utils::bodies::TaskLog) -> WorkflowSpec {
    WorkflowSpec::new(name).dag(DagSpec::new("main").task(TaskNode::new("only", record(log))))
}

#[tokio::test]
async fn worker_replies_to_status_queries() {
    init_tracing();
    let log = new_log();
    let mut harness = HarnessBuilder::new()
        .workflow(single_task_workflow("wf", log))
        .build();
    harness.spawn_worker(vec![JobKind::Workflow, JobKind::Dag, JobKind::Task], 2);

    let reply = with_timeout(harness.engine.bus.request(
        RunId::control(),
        SignalBody::Query(QueryRequest::WorkerStatus),
        Duration::from_secs(3),
    ))
    .await
    .unwrap();

    match reply {
        QueryReply::WorkerStatus { worker, queues, active_jobs } => {
            assert!(worker.starts_with("worker-"));
            assert_eq!(
                queues,
                vec![JobKind::Workflow, JobKind::Dag, JobKind::Task]
            );
            assert!(active_jobs.is_empty());
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn workers_stop_on_control_request() {
    init_tracing();
    let log = new_log();
    let mut harness = HarnessBuilder::new()
        .workflow(single_task_workflow("wf", log.clone()))
        .build();
    harness.spawn_default_workers();

    let (_, mut stream) = harness.start_workflow("wf", BTreeMap::new()).await;
    let state = with_timeout(harness.await_completion(&mut stream)).await;
    assert_eq!(state, RunState::Succeeded);

    // Shutdown publishes the stop request and joins every worker task; it
    // only returns once all of them drained.
    with_timeout(harness.shutdown()).await;
}

#[tokio::test]
async fn unknown_workflow_job_is_dead_lettered_with_a_failed_signal() {
    init_tracing();
    let log = new_log();
    let mut harness = HarnessBuilder::new()
        .workflow(single_task_workflow("known", log))
        .build();
    harness.spawn_default_workers();

    let run_id = RunId::new();
    let mut stream = harness.engine.bus.subscribe(run_id);

    // Bypass submission-time validation to emulate a stale or foreign job.
    harness
        .engine
        .queue
        .submit(JobRecord::workflow(run_id, "ghost", BTreeMap::new(), false))
        .await
        .unwrap();

    let state = with_timeout(async {
        loop {
            let signal = stream.recv().await.expect("stream stays open");
            if let SignalBody::WorkflowCompleted { state } = signal.body {
                return state;
            }
        }
    })
    .await;
    assert_eq!(state, RunState::Failed);

    // The job is not re-queued; it lands in the dead-letter queue.
    with_timeout(async {
        loop {
            if harness.broker.dead_letters().len() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert_eq!(harness.broker.queue_depth(JobKind::Workflow), 0);
}

#[tokio::test]
async fn repeated_submission_produces_independent_runs() {
    init_tracing();
    let log = new_log();
    let mut harness = HarnessBuilder::new()
        .workflow(single_task_workflow("wf", log.clone()))
        .build();
    harness.spawn_default_workers();

    let (run_a, mut stream_a) = harness.start_workflow("wf", BTreeMap::new()).await;
    let (run_b, mut stream_b) = harness.start_workflow("wf", BTreeMap::new()).await;
    assert_ne!(run_a, run_b);

    assert_eq!(
        with_timeout(harness.await_completion(&mut stream_a)).await,
        RunState::Succeeded
    );
    assert_eq!(
        with_timeout(harness.await_completion(&mut stream_b)).await,
        RunState::Succeeded
    );

    // Each run kept its own document; the task ran once per run.
    for run_id in [run_a, run_b] {
        assert!(harness.engine.store.doc_exists(run_id).await.unwrap());
        let name = harness
            .engine
            .store
            .get(run_id, &Section::Meta, "name")
            .await
            .unwrap();
        assert_eq!(name, Some(json!("wf")));
    }
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn cyclic_workflow_never_reaches_the_queue() {
    init_tracing();

    // Registration already rejects the cycle.
    let noop = || lightflow::task::script(|_| Ok(lightflow::task::TaskAction::default()));
    let cyclic = WorkflowSpec::new("cyclic").dag(
        DagSpec::new("main")
            .task(TaskNode::new("a", noop()))
            .task(TaskNode::new("b", noop()))
            .edge("a", "b")
            .edge("b", "a"),
    );
    let mut registry = lightflow::workflow::WorkflowRegistry::new();
    let err = registry.register(cyclic).unwrap_err();
    assert!(matches!(err, lightflow::errors::LightflowError::DagCycle { .. }));

    // Submitting an unknown workflow also enqueues nothing.
    let harness = HarnessBuilder::new().build();
    let err = harness
        .engine
        .submit_workflow("cyclic", BTreeMap::new(), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        lightflow::errors::LightflowError::WorkflowNotFound(_)
    ));
    assert_eq!(harness.broker.queue_depth(JobKind::Workflow), 0);
}

#[tokio::test]
async fn abort_request_terminates_the_run_as_aborted() {
    init_tracing();
    let log = new_log();
    let workflow = WorkflowSpec::new("abortable").dag(
        DagSpec::new("main")
            .task(TaskNode::new(
                "slow",
                lightflow_test_utils::bodies::sleeper(Duration::from_millis(400), log.clone()),
            ))
            .task(TaskNode::new("after", record(log.clone())))
            .edge("slow", "after"),
    );

    let mut harness = HarnessBuilder::new().workflow(workflow).build();
    harness.spawn_default_workers();

    let (run_id, mut stream) = harness.start_workflow("abortable", BTreeMap::new()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.engine.bus.publish(lightflow::signal::Signal::of(
        run_id,
        SignalBody::AbortRequest,
    ));

    let state = with_timeout(harness.await_completion(&mut stream)).await;
    assert_eq!(state, RunState::Aborted);

    // The successor never ran; the orphaned in-flight task is ignored.
    assert!(!log.lock().unwrap().contains(&"after".to_string()));
}
