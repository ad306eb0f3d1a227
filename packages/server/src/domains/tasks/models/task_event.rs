use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{Actor, TaskEventId, TaskId, TaskStatus, UserId};

/// Immutable audit record, one per status change.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskEvent {
    pub id: TaskEventId,
    pub task_id: TaskId,
    /// `None` for the creation event.
    pub from_status: Option<TaskStatus>,
    pub to_status: TaskStatus,
    /// `None` when the system acted.
    pub actor_id: Option<UserId>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(
        task_id: TaskId,
        from_status: Option<TaskStatus>,
        to_status: TaskStatus,
        actor: Actor,
        details: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskEventId::new(),
            task_id,
            from_status,
            to_status,
            actor_id: actor.user_id(),
            details,
            created_at: at,
        }
    }
}
