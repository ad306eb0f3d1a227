//! Task REST endpoints. Handlers are thin: parse, call the action, map errors.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::common::{Actor, Coordinate, DispatchResult, TaskId};
use crate::domains::tasks::actions;
use crate::domains::tasks::{NewTask, Task, TaskEvent};
use crate::server::app::AppState;
use crate::server::middleware::CurrentUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub skill_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub price_cents: i64,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelTaskRequest {
    pub reason: Option<String>,
}

pub async fn create_task_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateTaskRequest>,
) -> DispatchResult<(StatusCode, Json<Task>)> {
    let new_task = NewTask::builder()
        .requester_id(user.user_id)
        .skill_id(body.skill_id)
        .coordinate(Coordinate::new(body.latitude, body.longitude))
        .price_cents(body.price_cents)
        .description(body.description)
        .build();

    let task = actions::create_task(&state.deps, Actor::from(&user), new_task).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<TaskId>,
) -> DispatchResult<Json<Task>> {
    actions::get_task(&state.deps, &user, task_id).await.map(Json)
}

pub async fn list_events_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<TaskId>,
) -> DispatchResult<Json<Vec<TaskEvent>>> {
    actions::list_events(&state.deps, &user, task_id)
        .await
        .map(Json)
}

pub async fn claim_task_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<TaskId>,
) -> DispatchResult<Json<Task>> {
    actions::claim_task(&state.deps, &user, task_id).await.map(Json)
}

pub async fn decline_task_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<TaskId>,
) -> DispatchResult<Json<Task>> {
    actions::decline_task(&state.deps, &user, task_id)
        .await
        .map(Json)
}

pub async fn start_task_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<TaskId>,
) -> DispatchResult<Json<Task>> {
    actions::start_task(&state.deps, &user, task_id).await.map(Json)
}

pub async fn complete_task_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<TaskId>,
) -> DispatchResult<Json<Task>> {
    actions::complete_task(&state.deps, &user, task_id)
        .await
        .map(Json)
}

/// The body is optional; a bare POST cancels without a reason.
pub async fn cancel_task_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<TaskId>,
    body: Option<Json<CancelTaskRequest>>,
) -> DispatchResult<Json<Task>> {
    let reason = body.and_then(|Json(body)| body.reason);
    actions::cancel_task(&state.deps, &user, task_id, reason)
        .await
        .map(Json)
}

pub async fn retry_task_handler(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<TaskId>,
) -> DispatchResult<Json<Task>> {
    actions::retry_task(&state.deps, &user, task_id).await.map(Json)
}
