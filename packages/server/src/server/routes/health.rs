use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::domains::fanout::QueueStats;
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: DatabaseHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_pool: Option<ConnectionPoolHealth>,
    presence: PresenceHealth,
    consumers: ConsumerHealth,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct ConnectionPoolHealth {
    size: u32,
    idle_connections: usize,
    max_connections: u32,
}

#[derive(Serialize)]
pub struct PresenceHealth {
    online_users: usize,
}

#[derive(Serialize)]
pub struct ConsumerHealth {
    dead_lettered_total: u64,
    queues: Vec<QueueStats>,
}

/// Health check endpoint
///
/// Checks database connectivity (when Postgres backs the stores) and reports
/// presence and per-queue consumer counters. Dead letters are reported but do
/// not fail the check; they need an operator, not a restart.
///
/// Returns 200 OK if the database is reachable, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let (db_health, pool_health) = match &state.db_pool {
        Some(pool) => {
            let db_health = match tokio::time::timeout(
                std::time::Duration::from_secs(5),
                sqlx::query("SELECT 1").execute(pool),
            )
            .await
            {
                Ok(Ok(_)) => DatabaseHealth {
                    status: "ok".to_string(),
                    error: None,
                },
                Ok(Err(e)) => DatabaseHealth {
                    status: "error".to_string(),
                    error: Some(format!("Query failed: {}", e)),
                },
                Err(_) => DatabaseHealth {
                    status: "error".to_string(),
                    error: Some("Query timeout (>5s)".to_string()),
                },
            };
            let pool_health = ConnectionPoolHealth {
                size: pool.size(),
                idle_connections: pool.num_idle(),
                max_connections: pool.options().get_max_connections(),
            };
            (db_health, Some(pool_health))
        }
        None => (
            DatabaseHealth {
                status: "in_memory".to_string(),
                error: None,
            },
            None,
        ),
    };

    let is_healthy = db_health.error.is_none();
    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let stats = &state.deps.consumer_stats;
    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            database: db_health,
            connection_pool: pool_health,
            presence: PresenceHealth {
                online_users: state.deps.presence.online_count(),
            },
            consumers: ConsumerHealth {
                dead_lettered_total: stats.dead_lettered_total(),
                queues: stats.snapshot(),
            },
        }),
    )
}
