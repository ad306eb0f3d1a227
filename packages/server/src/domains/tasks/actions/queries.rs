use super::lifecycle::load_task;
use crate::common::{AuthUser, DispatchError, DispatchResult, TaskId, TaskStatus};
use crate::domains::tasks::models::{Task, TaskEvent};
use crate::kernel::ServerDeps;

/// Requester, assigned helper, admin, or a helper the task is currently
/// offered to.
fn ensure_can_view(user: &AuthUser, task: &Task) -> DispatchResult<()> {
    let offered = task.status == TaskStatus::Dispatched
        && user
            .helper_id
            .map(|helper_id| task.was_offered_to(helper_id))
            .unwrap_or(false);

    if user.is_admin() || offered || task.is_participant(user.user_id, user.helper_id) {
        Ok(())
    } else {
        Err(DispatchError::Forbidden(
            "not a participant of this task".to_string(),
        ))
    }
}

pub async fn get_task(deps: &ServerDeps, user: &AuthUser, task_id: TaskId) -> DispatchResult<Task> {
    let task = load_task(deps, task_id).await?;
    ensure_can_view(user, &task)?;
    Ok(task)
}

/// Audit trail in write order.
pub async fn list_events(
    deps: &ServerDeps,
    user: &AuthUser,
    task_id: TaskId,
) -> DispatchResult<Vec<TaskEvent>> {
    let task = load_task(deps, task_id).await?;
    ensure_can_view(user, &task)?;
    deps.tasks.list_events(task_id).await
}

/// Whether `user` may join the live room of `task_id`.
pub async fn can_join_room(deps: &ServerDeps, user: &AuthUser, task_id: TaskId) -> DispatchResult<bool> {
    let task = load_task(deps, task_id).await?;
    Ok(user.is_admin() || task.is_participant(user.user_id, user.helper_id))
}
