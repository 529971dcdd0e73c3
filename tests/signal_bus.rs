// tests/signal_bus.rs

//! Signal bus semantics: per-publisher ordering, request/reply correlation,
//! timeouts, channel close.

use std::time::Duration;

use lightflow::errors::LightflowError;
use lightflow::signal::{QueryReply, QueryRequest, Signal, SignalBody, SignalBus};
use lightflow::types::{RunId, RunState};
use lightflow_test_utils::with_timeout;

#[tokio::test]
async fn signals_from_one_publisher_arrive_in_order() {
    let bus = SignalBus::new();
    let run_id = RunId::new();
    let mut stream = bus.subscribe(run_id);

    for dag in ["first", "second", "third"] {
        bus.publish(Signal::of(
            run_id,
            SignalBody::DagCompleted {
                dag: dag.to_string(),
                stopped: false,
            },
        ));
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let signal = with_timeout(stream.recv()).await.unwrap();
        if let SignalBody::DagCompleted { dag, .. } = signal.body {
            seen.push(dag);
        }
    }
    assert_eq!(seen, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn signals_are_scoped_to_their_run() {
    let bus = SignalBus::new();
    let run_a = RunId::new();
    let run_b = RunId::new();
    let mut stream_b = bus.subscribe(run_b);

    bus.publish(Signal::of(run_a, SignalBody::AbortRequest));
    bus.publish(Signal::of(
        run_b,
        SignalBody::WorkflowCompleted {
            state: RunState::Succeeded,
        },
    ));

    let signal = with_timeout(stream_b.recv()).await.unwrap();
    assert!(matches!(
        signal.body,
        SignalBody::WorkflowCompleted { .. }
    ));
}

#[tokio::test]
async fn request_matches_reply_by_correlation_id() {
    let bus = std::sync::Arc::new(SignalBus::new());
    let run_id = RunId::new();

    // A responder that answers status queries, echoing the correlation id.
    let responder_bus = std::sync::Arc::clone(&bus);
    let mut responder_stream = bus.subscribe(run_id);
    tokio::spawn(async move {
        while let Some(signal) = responder_stream.recv().await {
            if let SignalBody::Query(QueryRequest::WorkflowStatus) = &signal.body {
                responder_bus.publish(signal.reply_to(QueryReply::WorkflowStatus {
                    state: RunState::Running,
                    live_dags: vec!["main".to_string()],
                }));
            }
        }
    });

    let reply = with_timeout(bus.request(
        run_id,
        SignalBody::Query(QueryRequest::WorkflowStatus),
        Duration::from_secs(2),
    ))
    .await
    .unwrap();

    match reply {
        QueryReply::WorkflowStatus { state, live_dags } => {
            assert_eq!(state, RunState::Running);
            assert_eq!(live_dags, vec!["main".to_string()]);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn request_without_responder_times_out() {
    let bus = SignalBus::new();
    let run_id = RunId::new();

    let err = bus
        .request(
            run_id,
            SignalBody::Query(QueryRequest::WorkflowStatus),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LightflowError::Timeout(_)));
}

#[tokio::test]
async fn closing_the_run_ends_subscriber_streams() {
    let bus = SignalBus::new();
    let run_id = RunId::new();
    let mut stream = bus.subscribe(run_id);

    bus.publish(Signal::of(run_id, SignalBody::AbortRequest));
    bus.close_run(run_id);

    // Buffered signal is still delivered, then the stream ends.
    assert!(with_timeout(stream.recv()).await.is_some());
    assert!(with_timeout(stream.recv()).await.is_none());
}
