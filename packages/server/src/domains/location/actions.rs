use serde_json::json;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use super::models::{IngestOutcome, LocationInput};
use crate::common::{AuthUser, DispatchError, DispatchResult, TaskId, TaskStatus};
use crate::domains::fanout::{DispatchEvent, EventType};
use crate::kernel::ServerDeps;

/// Accept one position sample from the helper assigned to `task_id`.
///
/// Samples arriving faster than the configured floor are throttled, not
/// rejected. A broker outage surfaces as `UpstreamUnavailable`.
#[instrument(skip(deps, user, input), fields(user_id = %user.user_id))]
pub async fn ingest_location(
    deps: &ServerDeps,
    user: &AuthUser,
    task_id: TaskId,
    input: LocationInput,
) -> DispatchResult<IngestOutcome> {
    let helper_id = user.require_helper()?;
    input.validate()?;

    let task = deps
        .tasks
        .find_by_id(task_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("task", task_id))?;
    if task.helper_id != Some(helper_id) {
        return Err(DispatchError::Forbidden(
            "only the assigned helper may report location".to_string(),
        ));
    }
    if !matches!(task.status, TaskStatus::Accepted | TaskStatus::InProgress) {
        return Err(DispatchError::Conflict(format!(
            "task is {} and no longer tracked",
            task.status
        )));
    }

    // Only samples that would be broadcast count against the floor
    let admitted_at = Instant::now();
    if let Err(retry_after_ms) = deps.location.admit(helper_id, admitted_at) {
        debug!(helper_id = %helper_id, retry_after_ms, "Location sample throttled");
        return Ok(IngestOutcome::Throttled { retry_after_ms });
    }

    if deps.location.destination(task_id).is_none() {
        deps.location.register_destination(task_id, task.coordinate());
    }

    let processed = match deps
        .location
        .process(helper_id, task_id, &input, admitted_at)
    {
        Ok(processed) => processed,
        Err(e) => {
            deps.location.release_admission(helper_id, admitted_at);
            return Err(e);
        }
    };
    let update = processed.update;

    let event = DispatchEvent::builder()
        .event_type(EventType::HelperLocation)
        .task_id(task_id)
        .requester_id(task.requester_id)
        .helper_id(helper_id)
        .actor_id(user.user_id)
        .payload(serde_json::to_value(&update)?)
        .source_position(processed.exact)
        .timestamp(update.timestamp)
        .build();
    if let Err(e) = deps.publisher.publish(&event).await {
        deps.location.release_admission(helper_id, admitted_at);
        return Err(e);
    }

    if processed.arriving {
        let arriving = DispatchEvent::builder()
            .event_type(EventType::HelperArriving)
            .task_id(task_id)
            .requester_id(task.requester_id)
            .helper_id(helper_id)
            .recipients(vec![task.requester_id, user.user_id])
            .payload(json!({
                "taskId": task_id,
                "helperId": helper_id,
                "distanceKm": update.distance_to_destination_km,
            }))
            .build();
        if let Err(e) = deps.publisher.publish(&arriving).await {
            warn!(task_id = %task_id, error = %e, "Failed to publish arrival");
        }
    }

    Ok(IngestOutcome::Accepted(update))
}
