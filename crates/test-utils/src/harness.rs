//! In-process engine harness: memory broker + bus + store with embedded
//! workers, so integration tests run whole workflows without any external
//! services.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use lightflow::queue::{JobKind, MemoryBroker};
use lightflow::signal::{Signal, SignalBody, SignalBus, SignalStream};
use lightflow::store::MemoryStore;
use lightflow::types::{RunId, RunState};
use lightflow::workflow::{WorkflowRegistry, WorkflowSpec};
use lightflow::Engine;

pub struct HarnessBuilder {
    registry: WorkflowRegistry,
    lease_ttl: Option<Duration>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            registry: WorkflowRegistry::new(),
            lease_ttl: None,
        }
    }

    pub fn workflow(mut self, spec: WorkflowSpec) -> Self {
        self.registry
            .register(spec)
            .expect("workflow registration failed");
        self
    }

    /// Shorten the broker lease so crash-redelivery tests finish quickly.
    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = Some(ttl);
        self
    }

    pub fn build(self) -> TestHarness {
        let broker = Arc::new(match self.lease_ttl {
            Some(ttl) => MemoryBroker::with_lease_ttl(ttl),
            None => MemoryBroker::new(),
        });
        let bus = Arc::new(SignalBus::new());
        let store = Arc::new(MemoryStore::new());

        let engine = Engine::new(
            broker.clone(),
            Arc::clone(&bus),
            store.clone(),
            Arc::new(self.registry),
        );

        TestHarness {
            engine,
            broker,
            store,
            workers: Vec::new(),
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestHarness {
    pub engine: Engine,
    pub broker: Arc<MemoryBroker>,
    pub store: Arc<MemoryStore>,
    workers: Vec<JoinHandle<lightflow::errors::Result<()>>>,
}

impl TestHarness {
    /// Spawn a worker servicing the given queues.
    pub fn spawn_worker(&mut self, queues: Vec<JobKind>, concurrency: usize) {
        let worker = self.engine.worker(queues, concurrency);
        self.workers.push(tokio::spawn(worker.run()));
    }

    /// The recommended deployment: one worker for workflow+dag jobs and one
    /// pool of task workers.
    pub fn spawn_default_workers(&mut self) {
        self.spawn_worker(vec![JobKind::Workflow, JobKind::Dag], 4);
        self.spawn_worker(vec![JobKind::Task], 8);
    }

    /// Subscribe to a fresh run's channel and submit the workflow job.
    ///
    /// Subscribing first guarantees the returned stream sees every signal of
    /// the run, including a fast completion.
    pub async fn start_workflow(
        &self,
        name: &str,
        args: BTreeMap<String, Value>,
    ) -> (RunId, SignalStream) {
        let run_id = RunId::new();
        let stream = self.engine.bus.subscribe(run_id);
        self.engine
            .submit_workflow_with_id(run_id, name, args, true)
            .await
            .expect("workflow submission failed");
        (run_id, stream)
    }

    /// Drain a run's signal stream until the workflow completes.
    pub async fn await_completion(&self, stream: &mut SignalStream) -> RunState {
        self.await_completion_collecting(stream).await.0
    }

    /// Like [`TestHarness::await_completion`], also returning every signal
    /// observed on the way for assertions about ordering.
    pub async fn await_completion_collecting(
        &self,
        stream: &mut SignalStream,
    ) -> (RunState, Vec<Signal>) {
        let mut seen = Vec::new();
        loop {
            let signal = stream
                .recv()
                .await
                .expect("signal channel closed before workflow completed");
            if let SignalBody::WorkflowCompleted { state } = signal.body {
                return (state, seen);
            }
            seen.push(signal);
        }
    }

    /// Stop all workers and wait for them to drain.
    pub async fn shutdown(self) {
        self.engine.bus.publish(Signal::of(
            RunId::control(),
            SignalBody::StopRequest { dag: None },
        ));
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}
