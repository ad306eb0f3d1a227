//! Status-changing operations on an existing task.
//!
//! Each operation validates against the transition table (or the forced
//! cancel/fail rules), then performs one conditional write through the store.

use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::notify::{announce, task_payload};
use crate::common::{Actor, AuthUser, DispatchError, DispatchResult, HelperId, TaskId, TaskStatus, UserId};
use crate::domains::fanout::EventType;
use crate::domains::presence::{actions as presence_actions, ActivityStatus};
use crate::domains::tasks::models::Task;
use crate::domains::tasks::state::{ensure_transition, forced_transition_allowed};
use crate::domains::tasks::store::StatusChange;
use crate::kernel::ServerDeps;

pub(crate) async fn load_task(deps: &ServerDeps, task_id: TaskId) -> DispatchResult<Task> {
    deps.tasks
        .find_by_id(task_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("task", task_id))
}

async fn helper_user_id(deps: &ServerDeps, helper_id: HelperId) -> Option<UserId> {
    match deps.helpers.find_by_id(helper_id).await {
        Ok(helper) => helper.map(|h| h.user_id),
        Err(e) => {
            warn!(helper_id = %helper_id, error = %e, "Failed to look up helper");
            None
        }
    }
}

/// Whitelisted, compare-and-swap status change.
///
/// `InvalidTransition` if `to` is not reachable from `from`;
/// `ConcurrentModification` if the task is no longer in `from`.
#[instrument(skip(deps, details), fields(task_id = %task_id, from = %from, to = %to))]
pub async fn transition(
    deps: &ServerDeps,
    task_id: TaskId,
    from: TaskStatus,
    to: TaskStatus,
    actor: Actor,
    details: Value,
) -> DispatchResult<Task> {
    ensure_transition(from, to)?;
    let task = deps
        .tasks
        .transition(task_id, StatusChange::new(from, to, actor).with_details(details))
        .await?;
    debug!("Transition committed");
    Ok(task)
}

/// Atomically assign the calling helper to a DISPATCHED task.
///
/// Of any number of concurrent claims exactly one succeeds; the rest get
/// `Conflict`. The helper is marked occupied first and released again if the
/// claim loses.
#[instrument(skip(deps, user), fields(task_id = %task_id, user_id = %user.user_id))]
pub async fn claim_task(deps: &ServerDeps, user: &AuthUser, task_id: TaskId) -> DispatchResult<Task> {
    let helper_id = user.require_helper()?;

    let helper = deps
        .helpers
        .find_by_id(helper_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("helper", helper_id))?;
    if !helper.is_verified() {
        return Err(DispatchError::Forbidden("helper is not verified".to_string()));
    }

    let task = load_task(deps, task_id).await?;
    match task.status {
        TaskStatus::Dispatched => {}
        TaskStatus::Accepted => {
            return Err(DispatchError::Conflict(format!("task {} already claimed", task_id)))
        }
        from => {
            return Err(DispatchError::InvalidTransition {
                from,
                to: TaskStatus::Accepted,
            })
        }
    }

    if !deps.helpers.try_occupy(helper_id, task_id).await? {
        return Err(DispatchError::Conflict(
            "helper is already busy with another task".to_string(),
        ));
    }

    let claimed = match deps.tasks.claim(task_id, helper_id, Actor::from(user)).await {
        Ok(task) => task,
        Err(e) => {
            if let Err(release_err) = deps.helpers.release(helper_id, task_id).await {
                warn!(helper_id = %helper_id, error = %release_err, "Failed to release helper after lost claim");
            }
            return Err(e);
        }
    };
    info!(helper_id = %helper_id, "Task claimed");

    deps.location
        .register_destination(task_id, claimed.coordinate());
    presence_actions::set_activity(deps, user.user_id, ActivityStatus::InTask).await;

    announce(
        deps,
        EventType::TaskAccepted,
        &claimed,
        Actor::from(user),
        vec![claimed.requester_id],
        task_payload(&claimed),
    )
    .await;

    Ok(claimed)
}

/// An offered helper turns the task down. Not a status change unless it was
/// the last outstanding offer, in which case the task fails.
#[instrument(skip(deps, user), fields(task_id = %task_id, user_id = %user.user_id))]
pub async fn decline_task(deps: &ServerDeps, user: &AuthUser, task_id: TaskId) -> DispatchResult<Task> {
    let helper_id = user.require_helper()?;
    let task = load_task(deps, task_id).await?;
    if !task.was_offered_to(helper_id) {
        return Err(DispatchError::Forbidden(
            "task was not offered to this helper".to_string(),
        ));
    }

    let task = deps.tasks.record_decline(task_id, helper_id).await?;
    info!(helper_id = %helper_id, declined = task.declined_helper_ids.len(), "Offer declined");

    if !task.all_candidates_declined() {
        return Ok(task);
    }

    match fail_task(
        deps,
        task_id,
        "all_candidates_declined",
        json!({ "declined": task.declined_helper_ids }),
    )
    .await
    {
        Ok(failed) => Ok(failed),
        // Someone claimed or cancelled in between; report current state
        Err(DispatchError::ConcurrentModification(_)) | Err(DispatchError::InvalidTransition { .. }) => {
            load_task(deps, task_id).await
        }
        Err(e) => Err(e),
    }
}

/// ACCEPTED -> IN_PROGRESS, assigned helper only.
#[instrument(skip(deps, user), fields(task_id = %task_id, user_id = %user.user_id))]
pub async fn start_task(deps: &ServerDeps, user: &AuthUser, task_id: TaskId) -> DispatchResult<Task> {
    let task = load_assigned(deps, user, task_id).await?;
    let started = transition(
        deps,
        task_id,
        task.status,
        TaskStatus::InProgress,
        Actor::from(user),
        json!({}),
    )
    .await?;

    announce(
        deps,
        EventType::TaskStarted,
        &started,
        Actor::from(user),
        vec![started.requester_id],
        task_payload(&started),
    )
    .await;
    Ok(started)
}

/// IN_PROGRESS -> COMPLETED, assigned helper only. Frees the helper and bumps
/// their completed count.
#[instrument(skip(deps, user), fields(task_id = %task_id, user_id = %user.user_id))]
pub async fn complete_task(deps: &ServerDeps, user: &AuthUser, task_id: TaskId) -> DispatchResult<Task> {
    let task = load_assigned(deps, user, task_id).await?;
    let helper_id = user.require_helper()?;

    let completed = transition(
        deps,
        task_id,
        task.status,
        TaskStatus::Completed,
        Actor::from(user),
        json!({ "price_cents": task.price_cents }),
    )
    .await?;
    info!(helper_id = %helper_id, "Task completed");

    if !deps.helpers.complete_occupancy(helper_id, task_id).await? {
        warn!(helper_id = %helper_id, "Helper was not occupied by the completed task");
    }
    deps.location.clear_destination(task_id);
    presence_actions::set_activity(deps, user.user_id, ActivityStatus::Available).await;

    announce(
        deps,
        EventType::TaskCompleted,
        &completed,
        Actor::from(user),
        vec![completed.requester_id],
        task_payload(&completed),
    )
    .await;
    Ok(completed)
}

/// Cancel from any non-terminal state. Requester or admin only.
#[instrument(skip(deps, user, reason), fields(task_id = %task_id, user_id = %user.user_id))]
pub async fn cancel_task(
    deps: &ServerDeps,
    user: &AuthUser,
    task_id: TaskId,
    reason: Option<String>,
) -> DispatchResult<Task> {
    let actor = Actor::from(user);
    let task = load_task(deps, task_id).await?;
    actor.ensure_requester_or_admin(task.requester_id)?;

    if !forced_transition_allowed(task.status, TaskStatus::Cancelled) {
        return Err(DispatchError::InvalidTransition {
            from: task.status,
            to: TaskStatus::Cancelled,
        });
    }

    let mut change = StatusChange::new(task.status, TaskStatus::Cancelled, actor)
        .with_details(json!({ "helper_id": task.helper_id }));
    if let Some(reason) = reason {
        change = change.with_reason(reason);
    }
    let cancelled = deps.tasks.transition(task_id, change).await?;
    info!(from = %task.status, "Task cancelled");

    deps.location.clear_destination(task_id);

    let mut recipients = vec![task.requester_id];
    if let Some(helper_id) = task.helper_id {
        if let Err(e) = deps.helpers.release(helper_id, task_id).await {
            warn!(helper_id = %helper_id, error = %e, "Failed to release helper");
        }
        if let Some(helper_user) = helper_user_id(deps, helper_id).await {
            presence_actions::set_activity(deps, helper_user, ActivityStatus::Available).await;
            recipients.push(helper_user);
        }
    }
    if task.status == TaskStatus::Dispatched {
        recipients.extend(task.dispatch_candidates.iter().map(|c| c.user_id));
    }

    let mut payload = task_payload(&cancelled);
    payload["previousHelperId"] = json!(task.helper_id);
    announce(deps, EventType::TaskCancelled, &cancelled, actor, recipients, payload).await;
    Ok(cancelled)
}

/// FAILED -> MATCHING and back onto the dispatch pool. Requester or admin only.
#[instrument(skip(deps, user), fields(task_id = %task_id, user_id = %user.user_id))]
pub async fn retry_task(deps: &ServerDeps, user: &AuthUser, task_id: TaskId) -> DispatchResult<Task> {
    let actor = Actor::from(user);
    let task = load_task(deps, task_id).await?;
    actor.ensure_requester_or_admin(task.requester_id)?;

    if task.status != TaskStatus::Failed {
        return Err(DispatchError::InvalidTransition {
            from: task.status,
            to: TaskStatus::Matching,
        });
    }

    let retried = transition(
        deps,
        task_id,
        TaskStatus::Failed,
        TaskStatus::Matching,
        actor,
        json!({ "retry": true, "previous_reason": task.failure_reason }),
    )
    .await?;
    info!("Task queued for another dispatch round");

    if let Err(e) = deps.dispatch_pool.submit(task_id) {
        warn!(error = %e, "Could not queue retried task");
        return fail_task(
            deps,
            task_id,
            "dispatch_unavailable",
            json!({ "cause": e.to_string() }),
        )
        .await;
    }
    Ok(retried)
}

/// CREATED → MATCHING by the system. A task that moved on concurrently is
/// returned as it now stands.
pub(crate) async fn enter_matching(deps: &ServerDeps, task: Task) -> DispatchResult<Task> {
    if task.status != TaskStatus::Created {
        return Ok(task);
    }
    match deps
        .tasks
        .transition(
            task.id,
            StatusChange::new(TaskStatus::Created, TaskStatus::Matching, Actor::System),
        )
        .await
    {
        Ok(task) => Ok(task),
        Err(DispatchError::ConcurrentModification(_)) => load_task(deps, task.id).await,
        Err(e) => Err(e),
    }
}

/// System-initiated failure of a task still being dispatched.
///
/// A CREATED task is first moved to MATCHING so that FAILED is only ever
/// reached from MATCHING or DISPATCHED. The write is conditioned on the
/// status just read.
#[instrument(skip(deps, details), fields(task_id = %task_id, reason = %reason))]
pub async fn fail_task(
    deps: &ServerDeps,
    task_id: TaskId,
    reason: &str,
    details: Value,
) -> DispatchResult<Task> {
    let task = load_task(deps, task_id).await?;
    let task = enter_matching(deps, task).await?;
    record_failure(deps, &task, reason, details).await
}

/// MATCHING/DISPATCHED → FAILED, expecting `task.status` to still hold.
pub(crate) async fn record_failure(
    deps: &ServerDeps,
    task: &Task,
    reason: &str,
    details: Value,
) -> DispatchResult<Task> {
    if !forced_transition_allowed(task.status, TaskStatus::Failed) {
        return Err(DispatchError::InvalidTransition {
            from: task.status,
            to: TaskStatus::Failed,
        });
    }

    let failed = deps
        .tasks
        .transition(
            task.id,
            StatusChange::new(task.status, TaskStatus::Failed, Actor::System)
                .with_details(details)
                .with_reason(reason),
        )
        .await?;
    warn!(task_id = %task.id, from = %task.status, reason, "Task failed");

    announce(
        deps,
        EventType::TaskFailed,
        &failed,
        Actor::System,
        vec![failed.requester_id],
        task_payload(&failed),
    )
    .await;
    Ok(failed)
}

/// The task, provided `user` is its assigned helper.
async fn load_assigned(deps: &ServerDeps, user: &AuthUser, task_id: TaskId) -> DispatchResult<Task> {
    let helper_id = user.require_helper()?;
    let task = load_task(deps, task_id).await?;
    if task.helper_id != Some(helper_id) {
        return Err(DispatchError::Forbidden(
            "only the assigned helper may do this".to_string(),
        ));
    }
    Ok(task)
}
