//! Background dispatch: matching on the worker pool, recovery of tasks that
//! never reached a worker, and the stale sweep.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use super::lifecycle::{enter_matching, fail_task, load_task, record_failure};
use super::notify::{announce, task_payload};
use crate::common::{Actor, DispatchError, DispatchResult, TaskId, TaskStatus};
use crate::domains::fanout::EventType;
use crate::domains::matching::{find_helpers, MatchRequest};
use crate::domains::tasks::store::StatusChange;
use crate::kernel::{DispatchJob, ServerDeps};

/// Move a task through MATCHING to DISPATCHED, or to FAILED when nobody is
/// available. A task no longer awaiting dispatch (e.g. cancelled while
/// queued) is left alone, and so is one another run got to first.
#[instrument(skip(deps), fields(task_id = %task_id))]
pub async fn run_dispatch(deps: &ServerDeps, task_id: TaskId) -> DispatchResult<()> {
    let task = load_task(deps, task_id).await?;
    let task = enter_matching(deps, task).await?;
    if task.status != TaskStatus::Matching {
        debug!(status = %task.status, "Task no longer awaiting dispatch");
        return Ok(());
    }

    let request = MatchRequest {
        cell: task.cell_id,
        coordinate: task.coordinate(),
        skill_id: task.skill_id.clone(),
        top_k: deps.config.match_top_k,
    };
    let candidates = find_helpers(
        &request,
        deps.helpers.as_ref(),
        deps.spatial.as_ref(),
        &deps.config,
    )
    .await?;

    if candidates.is_empty() {
        return match record_failure(
            deps,
            &task,
            "no_helpers_available",
            json!({ "max_ring": deps.config.match_max_ring }),
        )
        .await
        {
            Ok(_) => Ok(()),
            Err(DispatchError::ConcurrentModification(_)) => {
                debug!("Task left MATCHING during the ring scan");
                Ok(())
            }
            Err(e) => Err(e),
        };
    }

    let recipients: Vec<_> = candidates.iter().map(|c| c.user_id).collect();
    let details = json!({
        "candidate_count": candidates.len(),
        "helper_ids": candidates.iter().map(|c| c.helper_id).collect::<Vec<_>>(),
    });
    let dispatched = match deps
        .tasks
        .transition(
            task_id,
            StatusChange::new(TaskStatus::Matching, TaskStatus::Dispatched, Actor::System)
                .with_details(details)
                .with_candidates(candidates.clone()),
        )
        .await
    {
        Ok(task) => task,
        Err(DispatchError::ConcurrentModification(_)) => {
            debug!("Task left MATCHING during the ring scan");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    info!(candidates = candidates.len(), "Task dispatched");

    let mut payload = task_payload(&dispatched);
    payload["candidateCount"] = json!(candidates.len());
    announce(
        deps,
        EventType::TaskAssigned,
        &dispatched,
        Actor::System,
        recipients,
        payload,
    )
    .await;
    Ok(())
}

/// The job the dispatch pool runs for every submitted task.
pub struct MatchAndDispatch {
    deps: ServerDeps,
}

impl MatchAndDispatch {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl DispatchJob for MatchAndDispatch {
    async fn run(&self, task_id: TaskId) -> DispatchResult<()> {
        run_dispatch(&self.deps, task_id).await
    }

    async fn on_failure(&self, task_id: TaskId, cause: String) {
        match fail_task(&self.deps, task_id, "dispatch_error", json!({ "cause": cause })).await {
            Ok(_) => {}
            // Already terminal or moved on; nothing is stuck
            Err(DispatchError::InvalidTransition { from, .. }) => {
                debug!(task_id = %task_id, status = %from, "Dispatch failure after task moved on");
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Could not record dispatch failure");
            }
        }
    }
}

/// Requeue every task still in CREATED or MATCHING. The dispatch queue lives
/// in memory, so these are the tasks a stopped process never finished.
/// Waits for queue space instead of failing the backlog.
#[instrument(skip(deps))]
pub async fn resume_pending_dispatches(deps: &ServerDeps) -> DispatchResult<usize> {
    let pending = deps
        .tasks
        .find_stale(&[TaskStatus::Created, TaskStatus::Matching], Utc::now())
        .await?;

    for task in &pending {
        deps.dispatch_pool.enqueue(task.id).await?;
        debug!(task_id = %task.id, status = %task.status, "Requeued pending dispatch");
    }
    if !pending.is_empty() {
        info!(requeued = pending.len(), "Resumed pending dispatches");
    }
    Ok(pending.len())
}

/// Fail tasks stuck in CREATED, MATCHING or DISPATCHED longer than the
/// configured timeout. No-op when no timeout is configured.
pub async fn sweep_stale_tasks(deps: &ServerDeps) -> DispatchResult<usize> {
    let Some(timeout) = deps.config.task_dispatch_timeout else {
        return Ok(0);
    };
    let timeout = chrono::Duration::from_std(timeout)
        .map_err(|e| DispatchError::Validation(format!("dispatch timeout: {}", e)))?;
    let cutoff = Utc::now() - timeout;

    let stale = deps
        .tasks
        .find_stale(
            &[TaskStatus::Created, TaskStatus::Matching, TaskStatus::Dispatched],
            cutoff,
        )
        .await?;

    let mut failed = 0;
    for task in stale {
        match fail_task(
            deps,
            task.id,
            "dispatch_timeout",
            json!({ "timeout_secs": timeout.num_seconds(), "stuck_in": task.status }),
        )
        .await
        {
            Ok(_) => failed += 1,
            Err(DispatchError::ConcurrentModification(_)) | Err(DispatchError::InvalidTransition { .. }) => {
                debug!(task_id = %task.id, "Stale task moved on before sweep");
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Failed to time out task"),
        }
    }

    if failed > 0 {
        info!(failed, "Timed out stale dispatches");
    }
    Ok(failed)
}
