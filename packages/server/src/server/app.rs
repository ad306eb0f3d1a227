//! Application setup and router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::kernel::ServerDeps;
use crate::server::auth::JwtService;
use crate::server::middleware::jwt_auth_middleware;
use crate::server::routes::{health_handler, helpers, realtime, tasks};

/// Upper bound for a REST request. Upgraded sockets are not affected.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: ServerDeps,
    pub jwt_service: Arc<JwtService>,
    /// `None` for the in-memory backend.
    pub db_pool: Option<PgPool>,
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// Build the Axum application router
pub fn build_app(state: AppState, allowed_origins: &[String]) -> Router {
    let jwt_service_for_middleware = state.jwt_service.clone();

    let api = Router::new()
        .route("/tasks", post(tasks::create_task_handler))
        .route("/tasks/:id", get(tasks::get_task_handler))
        .route("/tasks/:id/events", get(tasks::list_events_handler))
        .route("/tasks/:id/claim", post(tasks::claim_task_handler))
        .route("/tasks/:id/decline", post(tasks::decline_task_handler))
        .route("/tasks/:id/start", post(tasks::start_task_handler))
        .route("/tasks/:id/complete", post(tasks::complete_task_handler))
        .route("/tasks/:id/cancel", post(tasks::cancel_task_handler))
        .route("/tasks/:id/retry", post(tasks::retry_task_handler))
        .route("/helpers/me/status", post(helpers::set_status_handler))
        .route("/helpers/me/heartbeat", post(helpers::heartbeat_handler))
        .route("/helpers/me/location", post(helpers::location_handler))
        .route("/ws", get(realtime::ws_handler));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(middleware::from_fn(move |req, next| {
            jwt_auth_middleware(jwt_service_for_middleware.clone(), req, next)
        }))
        .layer(Extension(state))
        .layer(cors_layer(allowed_origins))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}
