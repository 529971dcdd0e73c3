// tests/broker.rs

//! Memory broker semantics: reserve/ack/nack, attempt counting, lease expiry.

use std::collections::BTreeMap;
use std::time::Duration;

use lightflow::queue::{JobKind, JobQueue, JobRecord, MemoryBroker};
use lightflow::types::{RunId, WorkerId};
use lightflow_test_utils::with_timeout;

fn workflow_job() -> JobRecord {
    JobRecord::workflow(RunId::new(), "wf", BTreeMap::new(), false)
}

#[tokio::test]
async fn submit_reserve_ack_drains_the_queue() {
    let broker = MemoryBroker::new();
    let worker = WorkerId::named("w1");

    broker.submit(workflow_job()).await.unwrap();
    assert_eq!(broker.queue_depth(JobKind::Workflow), 1);

    let (record, lease) = with_timeout(broker.reserve(
        &[JobKind::Workflow],
        &worker,
        Duration::from_secs(1),
    ))
    .await
    .unwrap()
    .expect("job should be available");
    assert_eq!(record.kind, JobKind::Workflow);
    assert_eq!(record.attempt, 1);
    assert_eq!(broker.queue_depth(JobKind::Workflow), 0);

    broker.ack(lease).await.unwrap();
    let empty = broker
        .reserve(&[JobKind::Workflow], &worker, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(empty.is_none());
}

#[tokio::test]
async fn reserve_only_matches_requested_queues() {
    let broker = MemoryBroker::new();
    let worker = WorkerId::named("w1");

    broker.submit(workflow_job()).await.unwrap();

    let none = broker
        .reserve(&[JobKind::Task], &worker, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(none.is_none());

    let some = broker
        .reserve(
            &[JobKind::Workflow, JobKind::Dag],
            &worker,
            Duration::from_millis(50),
        )
        .await
        .unwrap();
    assert!(some.is_some());
}

#[tokio::test]
async fn nack_with_requeue_bumps_the_attempt() {
    let broker = MemoryBroker::new();
    let worker = WorkerId::named("w1");

    broker.submit(workflow_job()).await.unwrap();
    let (_, lease) = broker
        .reserve(&[JobKind::Workflow], &worker, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    broker.nack(lease, true).await.unwrap();

    let (record, _) = with_timeout(broker.reserve(
        &[JobKind::Workflow],
        &worker,
        Duration::from_secs(1),
    ))
    .await
    .unwrap()
    .expect("re-queued job should be visible");
    assert_eq!(record.attempt, 2);
}

#[tokio::test]
async fn nack_without_requeue_dead_letters() {
    let broker = MemoryBroker::new();
    let worker = WorkerId::named("w1");

    broker.submit(workflow_job()).await.unwrap();
    let (_, lease) = broker
        .reserve(&[JobKind::Workflow], &worker, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    broker.nack(lease, false).await.unwrap();

    assert_eq!(broker.dead_letters().len(), 1);
    assert_eq!(broker.queue_depth(JobKind::Workflow), 0);
}

#[tokio::test]
async fn expired_lease_makes_the_job_visible_again() {
    // A worker that crashes after reserving never acks; the lease expires and
    // another worker sees the job with a bumped attempt (at-least-once).
    let broker = MemoryBroker::with_lease_ttl(Duration::from_millis(50));
    let crashed = WorkerId::named("crashed");
    let survivor = WorkerId::named("survivor");

    broker.submit(workflow_job()).await.unwrap();
    let (_, _forgotten_lease) = broker
        .reserve(&[JobKind::Workflow], &crashed, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    let (record, lease) = with_timeout(broker.reserve(
        &[JobKind::Workflow],
        &survivor,
        Duration::from_secs(2),
    ))
    .await
    .unwrap()
    .expect("expired lease should re-queue the job");
    assert_eq!(record.attempt, 2);
    broker.ack(lease).await.unwrap();
}

#[tokio::test]
async fn ack_of_expired_lease_fails() {
    let broker = MemoryBroker::with_lease_ttl(Duration::from_millis(20));
    let worker = WorkerId::named("w1");

    broker.submit(workflow_job()).await.unwrap();
    let (_, lease) = broker
        .reserve(&[JobKind::Workflow], &worker, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    // Force expiry, then let a reserve pass notice it.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let _ = broker
        .reserve(&[JobKind::Workflow], &worker, Duration::from_millis(50))
        .await
        .unwrap();

    assert!(broker.ack(lease).await.is_err());
}
