//! Bounded worker pool for background matching.
//!
//! Task creation submits the task id and returns immediately. Workers pull
//! ids off a bounded queue and run the job with at most `workers` in flight.
//!
//! ```text
//! create_task ──submit──► [bounded queue] ──► DispatchWorkers
//!                                                 │
//!                                                 ├─► spawn job (semaphore permit)
//!                                                 └─► Err / panic ──► job.on_failure()
//! ```
//!
//! Every failure path, including a panicking job, ends in `on_failure` so a
//! task is never left in MATCHING without a recorded cause.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::{DispatchError, DispatchResult, TaskId};

/// Work executed for each submitted task.
#[async_trait]
pub trait DispatchJob: Send + Sync + 'static {
    async fn run(&self, task_id: TaskId) -> DispatchResult<()>;

    /// Called once when `run` errors or panics.
    async fn on_failure(&self, task_id: TaskId, cause: String);
}

/// Producer half, cloned into `ServerDeps`.
#[derive(Clone)]
pub struct DispatchPool {
    sender: mpsc::Sender<TaskId>,
}

/// Consumer half, started once at boot.
pub struct DispatchWorkers {
    receiver: mpsc::Receiver<TaskId>,
    workers: usize,
}

impl DispatchPool {
    pub fn new(capacity: usize, workers: usize) -> (Self, DispatchWorkers) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self { sender },
            DispatchWorkers {
                receiver,
                workers: workers.max(1),
            },
        )
    }

    /// Enqueue without waiting. A full or closed queue is reported to the
    /// caller, which fails the task rather than blocking creation.
    pub fn submit(&self, task_id: TaskId) -> DispatchResult<()> {
        self.sender.try_send(task_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                DispatchError::UpstreamUnavailable("dispatch queue saturated".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                DispatchError::UpstreamUnavailable("dispatch workers stopped".to_string())
            }
        })
    }

    /// Enqueue, waiting for space. Only a closed queue is an error.
    pub async fn enqueue(&self, task_id: TaskId) -> DispatchResult<()> {
        self.sender
            .send(task_id)
            .await
            .map_err(|_| DispatchError::UpstreamUnavailable("dispatch workers stopped".to_string()))
    }
}

impl DispatchWorkers {
    /// Run until the queue closes or `shutdown` fires.
    pub async fn run(mut self, job: Arc<dyn DispatchJob>, shutdown: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.workers));
        info!(workers = self.workers, "Dispatch workers started");

        loop {
            let task_id = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(task_id) => task_id,
                    None => break,
                },
            };

            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let job = job.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let inner = job.clone();
                let outcome = tokio::spawn(async move { inner.run(task_id).await }).await;

                let cause = match outcome {
                    Ok(Ok(())) => {
                        debug!(task_id = %task_id, "Dispatch job finished");
                        return;
                    }
                    Ok(Err(e)) => {
                        warn!(task_id = %task_id, error = %e, "Dispatch job failed");
                        e.to_string()
                    }
                    Err(join_error) => {
                        error!(task_id = %task_id, error = %join_error, "Dispatch job panicked");
                        format!("dispatch job aborted: {}", join_error)
                    }
                };
                job.on_failure(task_id, cause).await;
            });
        }

        info!("Dispatch workers stopped");
    }
}
