//! REST surface over the in-memory backend, driven through the router
//! without binding a socket.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use dispatch_core::common::{AuthUser, Role, TaskStatus};
use dispatch_core::domains::tasks::actions::run_dispatch;
use dispatch_core::domains::tasks::Task;
use dispatch_core::server::{auth::JwtService, build_app, AppState};
use serde_json::{json, Value};
use test_context::test_context;
use tower::ServiceExt;

use crate::common::{helper_identity, requester, seed_helper, HelperSeed, TestHarness};

const SECRET: &str = "test-secret";
const ISSUER: &str = "dispatch-core-tests";

fn jwt() -> JwtService {
    JwtService::new(SECRET, ISSUER.to_string())
}

fn app(ctx: &TestHarness) -> Router {
    let state = AppState {
        deps: ctx.deps.clone(),
        jwt_service: Arc::new(jwt()),
        db_pool: None,
    };
    build_app(state, &[])
}

fn token_for(user: &AuthUser) -> String {
    jwt()
        .create_token(user.user_id, user.role, user.helper_id)
        .unwrap()
}

fn post(uri: &str, user: Option<&AuthUser>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: &AuthUser) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn new_task_body() -> Value {
    json!({
        "skillId": "plumbing.tap_repair",
        "latitude": 17.45,
        "longitude": 78.391,
        "priceCents": 25000,
        "description": "Kitchen tap dripping"
    })
}

#[test_context(TestHarness)]
#[tokio::test]
async fn health_reports_in_memory_backend(ctx: &mut TestHarness) {
    let response = app(ctx)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["database"]["status"], "in_memory");
    assert_eq!(body["consumers"]["dead_lettered_total"], 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn api_requires_a_token(ctx: &mut TestHarness) {
    let response = app(ctx)
        .oneshot(post("/api/tasks", None, new_task_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "unauthorized");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn token_from_another_issuer_is_rejected(ctx: &mut TestHarness) {
    let user = requester();
    let foreign = JwtService::new(SECRET, "someone-else".to_string())
        .create_token(user.user_id, Role::Requester, None)
        .unwrap();
    let request = Request::get("/api/tasks/00000000-0000-0000-0000-000000000000")
        .header(header::AUTHORIZATION, format!("Bearer {}", foreign))
        .body(Body::empty())
        .unwrap();

    let response = app(ctx).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn requester_creates_and_reads_a_task(ctx: &mut TestHarness) {
    let owner = requester();

    let response = app(ctx)
        .oneshot(post("/api/tasks", Some(&owner), new_task_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Task = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(created.requester_id, owner.user_id);
    assert_eq!(created.status, TaskStatus::Created);

    let response = app(ctx)
        .oneshot(get(&format!("/api/tasks/{}", created.id), &owner))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(ctx)
        .oneshot(get(&format!("/api/tasks/{}/events", created.id), &owner))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let events = json_body(response).await;
    assert_eq!(events.as_array().unwrap().len(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn strangers_cannot_read_a_task(ctx: &mut TestHarness) {
    let owner = requester();
    let response = app(ctx)
        .oneshot(post("/api/tasks", Some(&owner), new_task_body()))
        .await
        .unwrap();
    let created: Task = serde_json::from_value(json_body(response).await).unwrap();

    let stranger = requester();
    let response = app(ctx)
        .oneshot(get(&format!("/api/tasks/{}", created.id), &stranger))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "forbidden");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn invalid_coordinates_are_a_bad_request(ctx: &mut TestHarness) {
    let mut body = new_task_body();
    body["latitude"] = json!(123.0);

    let response = app(ctx)
        .oneshot(post("/api/tasks", Some(&requester()), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn second_claim_over_http_is_a_conflict(ctx: &mut TestHarness) {
    let owner = requester();
    let first = helper_identity(&seed_helper(&ctx.deps, HelperSeed::default()).await);
    let second = helper_identity(&seed_helper(&ctx.deps, HelperSeed::default()).await);

    let response = app(ctx)
        .oneshot(post("/api/tasks", Some(&owner), new_task_body()))
        .await
        .unwrap();
    let created: Task = serde_json::from_value(json_body(response).await).unwrap();
    run_dispatch(&ctx.deps, created.id).await.unwrap();

    let claim_uri = format!("/api/tasks/{}/claim", created.id);
    let response = app(ctx)
        .oneshot(post(&claim_uri, Some(&first), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let claimed: Task = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(claimed.status, TaskStatus::Accepted);
    assert_eq!(claimed.helper_id, first.helper_id);

    let response = app(ctx)
        .oneshot(post(&claim_uri, Some(&second), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn heartbeat_marks_helper_online(ctx: &mut TestHarness) {
    let helper = helper_identity(&seed_helper(&ctx.deps, HelperSeed::default()).await);

    let response = app(ctx)
        .oneshot(post(
            "/api/helpers/me/heartbeat",
            Some(&helper),
            json!({ "latitude": 17.451, "longitude": 78.392 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(ctx.deps.presence.is_online(helper.user_id));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn half_a_coordinate_is_rejected(ctx: &mut TestHarness) {
    let helper = helper_identity(&seed_helper(&ctx.deps, HelperSeed::default()).await);

    let response = app(ctx)
        .oneshot(post(
            "/api/helpers/me/heartbeat",
            Some(&helper),
            json!({ "latitude": 17.451 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
