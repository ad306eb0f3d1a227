use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{claim_event, missed_claim, missed_write, StatusChange, TaskStore};
use crate::common::{Actor, DispatchError, DispatchResult, HelperId, TaskId, TaskStatus};
use crate::domains::tasks::models::{Task, TaskEvent};

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    events: Vec<TaskEvent>,
}

/// Task store for tests and memory-mode runs.
///
/// Row write and event append happen under one lock, matching the
/// transactional behaviour of the Postgres store.
#[derive(Default)]
pub struct InMemoryTaskStore {
    inner: Mutex<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Backdate `updated_at`, for exercising the stale-dispatch sweep.
    pub fn set_updated_at(&self, id: TaskId, at: DateTime<Utc>) {
        if let Some(task) = self.lock().tasks.get_mut(&id) {
            task.updated_at = at;
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task, actor: Actor) -> DispatchResult<Task> {
        let mut inner = self.lock();
        if inner.tasks.contains_key(&task.id) {
            return Err(DispatchError::Conflict(format!("task {} already exists", task.id)));
        }

        inner.tasks.insert(task.id, task.clone());
        inner.events.push(TaskEvent::new(
            task.id,
            None,
            task.status,
            actor,
            json!({ "skill_id": task.skill_id, "cell_id": task.cell_id }),
            task.created_at,
        ));
        Ok(task.clone())
    }

    async fn find_by_id(&self, id: TaskId) -> DispatchResult<Option<Task>> {
        Ok(self.lock().tasks.get(&id).cloned())
    }

    async fn transition(&self, id: TaskId, change: StatusChange) -> DispatchResult<Task> {
        let now = Utc::now();
        let mut inner = self.lock();

        let task = match inner.tasks.get_mut(&id) {
            Some(task) if task.status == change.from => task,
            other => {
                let current = other.map(|t| t.status);
                return Err(missed_write(id, current, change.from));
            }
        };

        change.apply(task, now);
        let updated = task.clone();
        inner.events.push(change.event(id, now));
        Ok(updated)
    }

    async fn claim(&self, id: TaskId, helper_id: HelperId, actor: Actor) -> DispatchResult<Task> {
        let now = Utc::now();
        let mut inner = self.lock();

        let task = match inner.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Dispatched && task.helper_id.is_none() => task,
            other => {
                let current = other.map(|t| t.status);
                return Err(missed_claim(id, current));
            }
        };

        task.status = TaskStatus::Accepted;
        task.helper_id = Some(helper_id);
        task.accepted_at = Some(now);
        task.updated_at = now;
        let claimed = task.clone();
        inner.events.push(claim_event(id, helper_id, actor, now));
        Ok(claimed)
    }

    async fn record_decline(&self, id: TaskId, helper_id: HelperId) -> DispatchResult<Task> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found("task", id))?;

        if task.status != TaskStatus::Dispatched {
            return Err(DispatchError::Conflict(format!(
                "task {} is {}, no longer open for offers",
                id, task.status
            )));
        }
        if !task.declined_helper_ids.contains(&helper_id) {
            task.declined_helper_ids.push(helper_id);
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn list_events(&self, id: TaskId) -> DispatchResult<Vec<TaskEvent>> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|e| e.task_id == id)
            .cloned()
            .collect())
    }

    async fn find_stale(
        &self,
        statuses: &[TaskStatus],
        older_than: DateTime<Utc>,
    ) -> DispatchResult<Vec<Task>> {
        let mut stale: Vec<Task> = self
            .lock()
            .tasks
            .values()
            .filter(|t| statuses.contains(&t.status) && t.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.updated_at);
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Coordinate, UserId};
    use crate::domains::spatial::CellId;
    use crate::domains::tasks::models::NewTask;

    fn new_task() -> Task {
        NewTask::builder()
            .requester_id(UserId::new())
            .skill_id("plumbing.tap_repair")
            .coordinate(Coordinate::new(17.45, 78.391))
            .build()
            .into_task(CellId::from_i64(7))
    }

    #[tokio::test]
    async fn test_transition_is_conditional_on_prior_status() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(&new_task(), Actor::System).await.unwrap();

        let first = store
            .transition(
                task.id,
                StatusChange::new(TaskStatus::Created, TaskStatus::Matching, Actor::System),
            )
            .await;
        assert!(first.is_ok());

        // A second writer that still believes the task is CREATED loses
        let second = store
            .transition(
                task.id,
                StatusChange::new(TaskStatus::Created, TaskStatus::Cancelled, Actor::System),
            )
            .await;
        assert!(matches!(second, Err(DispatchError::ConcurrentModification(_))));

        let events = store.list_events(task.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].from_status, None);
        assert_eq!(events[1].to_status, TaskStatus::Matching);
    }

    #[tokio::test]
    async fn test_transition_unknown_task_is_not_found() {
        let store = InMemoryTaskStore::new();
        let result = store
            .transition(
                TaskId::new(),
                StatusChange::new(TaskStatus::Created, TaskStatus::Matching, Actor::System),
            )
            .await;
        assert!(matches!(result, Err(DispatchError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_failure_reason_is_recorded_and_cleared_on_retry() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(&new_task(), Actor::System).await.unwrap();

        store
            .transition(
                task.id,
                StatusChange::new(TaskStatus::Created, TaskStatus::Matching, Actor::System),
            )
            .await
            .unwrap();
        let failed = store
            .transition(
                task.id,
                StatusChange::new(TaskStatus::Matching, TaskStatus::Failed, Actor::System)
                    .with_reason("no_helpers_available"),
            )
            .await
            .unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("no_helpers_available"));
        assert!(failed.finished_at.is_some());

        let retried = store
            .transition(
                task.id,
                StatusChange::new(TaskStatus::Failed, TaskStatus::Matching, Actor::System),
            )
            .await
            .unwrap();
        assert_eq!(retried.failure_reason, None);
        assert_eq!(retried.finished_at, None);

        let events = store.list_events(task.id).await.unwrap();
        assert_eq!(events[2].details["reason"], "no_helpers_available");
    }

    #[tokio::test]
    async fn test_claim_only_from_dispatched() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(&new_task(), Actor::System).await.unwrap();

        let early = store.claim(task.id, HelperId::new(), Actor::System).await;
        assert!(matches!(early, Err(DispatchError::InvalidTransition { .. })));
    }
}
