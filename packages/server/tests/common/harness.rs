//! Test harness over in-memory collaborators.
//!
//! Each test gets fresh stores, a fresh in-memory broker and mock push and
//! ledger services wired into a real `ServerDeps`. Matching workers are held
//! but not started, so tests drive `run_dispatch` explicitly unless they call
//! `start_dispatch_workers`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dispatch_core::common::{TaskId, TaskStatus};
use dispatch_core::domains::fanout::{run_consumers, ConsumerTable};
use dispatch_core::domains::tasks::actions::MatchAndDispatch;
use dispatch_core::kernel::test_dependencies::{MockLedgerService, MockPushNotificationService};
use dispatch_core::kernel::{DispatchWorkers, InMemoryBroker, ServerDeps, TestDependencies};
use dispatch_core::domains::helpers::InMemoryHelperStore;
use dispatch_core::domains::tasks::{InMemoryTaskStore, Task};
use test_context::AsyncTestContext;
use tokio_util::sync::CancellationToken;

pub struct TestHarness {
    pub deps: ServerDeps,
    pub tasks: Arc<InMemoryTaskStore>,
    pub helpers: Arc<InMemoryHelperStore>,
    pub broker: InMemoryBroker,
    pub push: Arc<MockPushNotificationService>,
    pub ledger: Arc<MockLedgerService>,
    workers: Mutex<Option<DispatchWorkers>>,
    shutdown: CancellationToken,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new(TestDependencies::new())
    }

    async fn teardown(self) {
        self.shutdown.cancel();
    }
}

impl TestHarness {
    pub fn new(test_deps: TestDependencies) -> Self {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let tasks = test_deps.tasks.clone();
        let helpers = test_deps.helpers.clone();
        let broker = test_deps.broker.clone();
        let push = test_deps.push_service.clone();
        let ledger = test_deps.ledger.clone();
        let (deps, workers) = test_deps.into_deps();

        Self {
            deps,
            tasks,
            helpers,
            broker,
            push,
            ledger,
            workers: Mutex::new(Some(workers)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the matching pool so submitted tasks are dispatched in the background.
    pub fn start_dispatch_workers(&self) {
        let workers = self.workers.lock().unwrap().take();
        if let Some(workers) = workers {
            let job = Arc::new(MatchAndDispatch::new(self.deps.clone()));
            tokio::spawn(workers.run(job, self.shutdown.clone()));
        }
    }

    /// Start every broker consumer in the standard table.
    pub async fn start_consumers(&self) {
        run_consumers(
            self.deps.clone(),
            ConsumerTable::standard(),
            self.shutdown.clone(),
        )
        .await
        .expect("consumers should start on the in-memory broker");
    }

    /// Poll `check` until it holds or two seconds pass.
    pub async fn wait_until<F>(&self, mut check: F) -> bool
    where
        F: FnMut() -> bool,
    {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    /// Poll the task store until `task_id` reaches `status` or two seconds pass.
    pub async fn wait_for_status(&self, task_id: TaskId, status: TaskStatus) -> Task {
        for _ in 0..200 {
            let task = self
                .deps
                .tasks
                .find_by_id(task_id)
                .await
                .unwrap()
                .expect("task should exist");
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {}", task_id, status);
    }
}
