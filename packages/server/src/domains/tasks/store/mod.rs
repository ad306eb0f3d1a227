//! Task persistence with compare-and-swap status writes.
//!
//! Every status write is conditioned on the status the caller observed and
//! appends its `TaskEvent` in the same unit of work, so per-task event order
//! follows the conditional-write order.

mod memory;
mod postgres;

pub use memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::models::{Task, TaskEvent};
use crate::common::{Actor, DispatchError, DispatchResult, HelperId, TaskId, TaskStatus};
use crate::domains::matching::MatchCandidate;

/// A status write conditioned on `from`.
///
/// Whitelist checks happen in the caller; the store only guarantees the
/// conditional write.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub actor: Actor,
    pub details: serde_json::Value,
    /// Replaces the offer list when set (MATCHING -> DISPATCHED).
    pub candidates: Option<Vec<MatchCandidate>>,
    pub reason: Option<String>,
}

impl StatusChange {
    pub fn new(from: TaskStatus, to: TaskStatus, actor: Actor) -> Self {
        Self {
            from,
            to,
            actor,
            details: json!({}),
            candidates: None,
            reason: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<MatchCandidate>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    /// Failure or cancellation reason, also merged into the event details.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if let Some(details) = self.details.as_object_mut() {
            details.insert("reason".to_string(), json!(reason));
        }
        self.reason = Some(reason);
        self
    }

    fn clears_helper(&self) -> bool {
        !self.to.holds_helper()
    }

    /// Retry starts a fresh dispatch round.
    fn resets_declines(&self) -> bool {
        self.to == TaskStatus::Matching
    }

    fn failure_reason(&self) -> Option<String> {
        (self.to == TaskStatus::Failed)
            .then(|| self.reason.clone())
            .flatten()
    }

    fn cancellation_reason(&self) -> Option<String> {
        (self.to == TaskStatus::Cancelled)
            .then(|| self.reason.clone())
            .flatten()
    }

    fn started_at(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.to == TaskStatus::InProgress).then_some(at)
    }

    fn finished_at(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        matches!(
            self.to,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
        )
        .then_some(at)
    }

    /// Apply the field rules to an in-memory row. Mirrors the Postgres `UPDATE`.
    fn apply(&self, task: &mut Task, at: DateTime<Utc>) {
        task.status = self.to;
        if self.clears_helper() {
            task.helper_id = None;
        }
        if let Some(candidates) = &self.candidates {
            task.dispatch_candidates = sqlx::types::Json(candidates.clone());
        }
        if self.resets_declines() {
            task.declined_helper_ids.clear();
        }
        task.failure_reason = self.failure_reason();
        task.cancellation_reason = self.cancellation_reason();
        task.cancelled_by = if self.to == TaskStatus::Cancelled {
            self.actor.user_id()
        } else {
            None
        };
        if let Some(started) = self.started_at(at) {
            task.started_at = Some(started);
        }
        task.finished_at = self.finished_at(at);
        task.updated_at = at;
    }

    fn event(&self, task_id: TaskId, at: DateTime<Utc>) -> TaskEvent {
        TaskEvent::new(
            task_id,
            Some(self.from),
            self.to,
            self.actor,
            self.details.clone(),
            at,
        )
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a CREATED task together with its creation event.
    async fn insert(&self, task: &Task, actor: Actor) -> DispatchResult<Task>;

    async fn find_by_id(&self, id: TaskId) -> DispatchResult<Option<Task>>;

    /// Conditional status write. `NotFound` if the task is missing,
    /// `ConcurrentModification` if its status is no longer `change.from`.
    async fn transition(&self, id: TaskId, change: StatusChange) -> DispatchResult<Task>;

    /// DISPATCHED -> ACCEPTED in one conditional write on
    /// `status = DISPATCHED AND helper_id IS NULL`. Losers get `Conflict`.
    async fn claim(&self, id: TaskId, helper_id: HelperId, actor: Actor) -> DispatchResult<Task>;

    /// Record that an offered helper declined. Only while DISPATCHED; idempotent.
    async fn record_decline(&self, id: TaskId, helper_id: HelperId) -> DispatchResult<Task>;

    /// Audit trail in write order.
    async fn list_events(&self, id: TaskId) -> DispatchResult<Vec<TaskEvent>>;

    /// Tasks in `statuses` not touched since `older_than`.
    async fn find_stale(
        &self,
        statuses: &[TaskStatus],
        older_than: DateTime<Utc>,
    ) -> DispatchResult<Vec<Task>>;
}

/// Classify a conditional write that matched no row.
fn missed_write(id: TaskId, current: Option<TaskStatus>, expected: TaskStatus) -> DispatchError {
    match current {
        None => DispatchError::not_found("task", id),
        Some(status) => DispatchError::ConcurrentModification(format!(
            "task {} is {}, expected {}",
            id, status, expected
        )),
    }
}

/// Classify a claim that matched no row.
fn missed_claim(id: TaskId, current: Option<TaskStatus>) -> DispatchError {
    match current {
        None => DispatchError::not_found("task", id),
        Some(TaskStatus::Dispatched) | Some(TaskStatus::Accepted) => {
            DispatchError::Conflict(format!("task {} already claimed", id))
        }
        Some(status) => DispatchError::InvalidTransition {
            from: status,
            to: TaskStatus::Accepted,
        },
    }
}

fn claim_event(id: TaskId, helper_id: HelperId, actor: Actor, at: DateTime<Utc>) -> TaskEvent {
    TaskEvent::new(
        id,
        Some(TaskStatus::Dispatched),
        TaskStatus::Accepted,
        actor,
        json!({ "helper_id": helper_id }),
        at,
    )
}
