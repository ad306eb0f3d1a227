use thiserror::Error;

use super::types::TaskStatus;

/// Error taxonomy for the dispatch core.
///
/// Validation and transition errors are returned to the caller before any
/// state is mutated. `ConcurrentModification` and `Conflict` mean a
/// conditional write lost a race: refresh state or try another candidate
/// instead of retrying blindly.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl DispatchError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DispatchError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable kind, used in HTTP and socket error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "validation_error",
            DispatchError::InvalidTransition { .. } => "invalid_transition",
            DispatchError::ConcurrentModification(_) => "concurrent_modification",
            DispatchError::Conflict(_) => "conflict",
            DispatchError::NotFound { .. } => "not_found",
            DispatchError::RateLimited { .. } => "rate_limited",
            DispatchError::Forbidden(_) => "forbidden",
            DispatchError::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DispatchError::not_found("row", "query returned no rows"),
            other => DispatchError::UpstreamUnavailable(format!("database: {}", other)),
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Validation(format!("malformed payload: {}", err))
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = DispatchError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_pool_errors_are_upstream_unavailable() {
        let err = DispatchError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DispatchError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_concurrent_modification_message_reads_cleanly() {
        let err = DispatchError::ConcurrentModification(
            "task 42 is dispatched, expected matching".to_string(),
        );
        assert_eq!(
            err.to_string(),
            "Concurrent modification: task 42 is dispatched, expected matching"
        );
    }
}
