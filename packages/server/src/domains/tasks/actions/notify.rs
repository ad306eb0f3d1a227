use serde_json::{json, Value};
use tracing::warn;

use crate::common::{Actor, UserId};
use crate::domains::fanout::{DispatchEvent, EventType};
use crate::domains::tasks::models::Task;
use crate::kernel::ServerDeps;

/// Client-facing summary of a task, used as the payload of lifecycle events.
pub(crate) fn task_payload(task: &Task) -> Value {
    json!({
        "taskId": task.id,
        "status": task.status,
        "requesterId": task.requester_id,
        "helperId": task.helper_id,
        "skillId": task.skill_id,
        "latitude": task.latitude,
        "longitude": task.longitude,
        "priceCents": task.price_cents,
        "failureReason": task.failure_reason,
        "cancellationReason": task.cancellation_reason,
        "updatedAt": task.updated_at,
    })
}

/// Publish a lifecycle event for a committed write. The write already
/// happened, so a broker failure is logged rather than returned.
pub(crate) async fn announce(
    deps: &ServerDeps,
    event_type: EventType,
    task: &Task,
    actor: Actor,
    recipients: Vec<UserId>,
    payload: Value,
) {
    let event = DispatchEvent::builder()
        .event_type(event_type)
        .task_id(task.id)
        .requester_id(task.requester_id)
        .helper_id(task.helper_id)
        .actor_id(actor.user_id())
        .recipients(recipients)
        .payload(payload)
        .build();

    if let Err(e) = deps.publisher.publish(&event).await {
        warn!(
            task_id = %task.id,
            event = event_type.channel(),
            error = %e,
            "Failed to publish task event"
        );
    }
}
