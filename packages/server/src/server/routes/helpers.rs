//! Helper self-service endpoints: status, heartbeat, location samples.

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Deserialize;

use crate::common::{Coordinate, DispatchError, DispatchResult, TaskId};
use crate::domains::helpers::{actions, HelperAvailability};
use crate::domains::location::{ingest_location, IngestOutcome, LocationInput, LocationUpdate};
use crate::domains::presence::ActivityStatus;
use crate::server::app::AppState;
use crate::server::middleware::CurrentUser;

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub online: bool,
    pub activity: Option<ActivityStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRequest {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub sample: LocationInput,
}

pub async fn set_status_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<SetStatusRequest>,
) -> DispatchResult<Json<HelperAvailability>> {
    actions::set_status(&state.deps, &user, body.online, body.activity)
        .await
        .map(Json)
}

pub async fn heartbeat_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    body: Option<Json<HeartbeatRequest>>,
) -> DispatchResult<StatusCode> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let position = match (body.latitude, body.longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinate::new(latitude, longitude)),
        (None, None) => None,
        _ => {
            return Err(DispatchError::Validation(
                "latitude and longitude must be sent together".to_string(),
            ))
        }
    };

    actions::heartbeat(&state.deps, &user, position).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 202 with the broadcast form of the sample, or 429 when throttled.
pub async fn location_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<LocationRequest>,
) -> DispatchResult<(StatusCode, Json<LocationUpdate>)> {
    match ingest_location(&state.deps, &user, body.task_id, body.sample).await? {
        IngestOutcome::Accepted(update) => Ok((StatusCode::ACCEPTED, Json(update))),
        IngestOutcome::Throttled { retry_after_ms } => {
            Err(DispatchError::RateLimited { retry_after_ms })
        }
    }
}
