use serde_json::json;
use tracing::{info, instrument, warn};

use super::fail_task;
use crate::common::{Actor, DispatchError, DispatchResult};
use crate::domains::tasks::models::{NewTask, Task};
use crate::kernel::ServerDeps;

/// Validate and insert a CREATED task, then hand it to the dispatch pool.
///
/// Returns as soon as the row is written. Matching runs on a worker; its
/// outcome is visible only through the task's status and events.
#[instrument(skip(deps, new_task), fields(requester_id = %new_task.requester_id, skill = %new_task.skill_id))]
pub async fn create_task(deps: &ServerDeps, actor: Actor, new_task: NewTask) -> DispatchResult<Task> {
    new_task.coordinate.validate()?;
    if new_task.skill_id.trim().is_empty() {
        return Err(DispatchError::Validation("skill_id is required".to_string()));
    }
    if new_task.price_cents < 0 {
        return Err(DispatchError::Validation(
            "price must not be negative".to_string(),
        ));
    }

    let known = deps
        .skills
        .skill_exists(&new_task.skill_id)
        .await
        .map_err(|e| DispatchError::UpstreamUnavailable(format!("skill catalog: {}", e)))?;
    if !known {
        return Err(DispatchError::not_found("skill", &new_task.skill_id));
    }

    let cell = deps
        .spatial
        .cell_for(new_task.coordinate, deps.config.spatial_resolution);
    let task = deps.tasks.insert(&new_task.into_task(cell), actor).await?;
    info!(task_id = %task.id, cell = %task.cell_id, "Task created");

    if let Err(e) = deps.dispatch_pool.submit(task.id) {
        warn!(task_id = %task.id, error = %e, "Could not queue task for matching");
        if let Err(fail_err) = fail_task(
            deps,
            task.id,
            "dispatch_unavailable",
            json!({ "cause": e.to_string() }),
        )
        .await
        {
            warn!(task_id = %task.id, error = %fail_err, "Failed to mark task as failed");
        }
    }

    Ok(task)
}
