//! Presence actions - wrap `PresenceService` and publish `status:changed`.

use chrono::Utc;
use tracing::{info, warn};

use super::models::{ActivityStatus, DeviceInfo, PresenceChange};
use crate::common::{AuthUser, SessionId, UserId};
use crate::domains::fanout::{DispatchEvent, EventType};
use crate::kernel::ServerDeps;

/// A socket connected.
pub async fn connect(
    deps: &ServerDeps,
    user: &AuthUser,
    session_id: SessionId,
    device: DeviceInfo,
) {
    if let Some(change) = deps
        .presence
        .set_online(user, session_id, device, Utc::now())
    {
        publish_change(deps, &change).await;
    }
}

/// A socket closed. Offline is published only when it was the last session.
pub async fn disconnect(deps: &ServerDeps, user_id: UserId, session_id: SessionId) {
    if let Some(change) = deps.presence.set_offline(user_id, session_id, Utc::now()) {
        publish_change(deps, &change).await;
    }
}

/// Sessionless heartbeat (REST clients).
pub async fn heartbeat(deps: &ServerDeps, user: &AuthUser) {
    if let Some(change) = deps.presence.touch(user, Utc::now()) {
        publish_change(deps, &change).await;
    }
}

pub async fn set_activity(deps: &ServerDeps, user_id: UserId, activity: ActivityStatus) {
    if let Some(change) = deps.presence.set_activity(user_id, activity, Utc::now()) {
        publish_change(deps, &change).await;
    }
}

/// Explicit "go offline" from a REST client: drop every session at once.
pub async fn go_offline(deps: &ServerDeps, user_id: UserId) {
    if let Some(change) = deps.presence.force_offline(user_id, Utc::now()) {
        publish_change(deps, &change).await;
    }
}

/// Periodic staleness sweep.
pub async fn sweep_presence(deps: &ServerDeps) -> usize {
    let changes = deps.presence.sweep(Utc::now());
    for change in &changes {
        publish_change(deps, change).await;
    }
    if !changes.is_empty() {
        info!(went_offline = changes.len(), "Presence sweep marked users offline");
    }
    changes.len()
}

/// A failed broker publish is logged; the in-process channel already fired.
async fn publish_change(deps: &ServerDeps, change: &PresenceChange) {
    let payload = match serde_json::to_value(change) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(user_id = %change.user_id, error = %e, "Failed to encode presence change");
            return;
        }
    };

    let event = DispatchEvent::builder()
        .event_type(EventType::StatusChanged)
        .helper_id(change.helper_id)
        .actor_id(change.user_id)
        .recipients(vec![change.user_id])
        .payload(payload)
        .timestamp(change.at)
        .build();

    if let Err(e) = deps.publisher.publish(&event).await {
        warn!(user_id = %change.user_id, error = %e, "Failed to publish presence change");
    }
}
