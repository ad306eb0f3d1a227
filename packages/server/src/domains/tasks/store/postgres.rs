use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use super::{claim_event, missed_claim, missed_write, StatusChange, TaskStore};
use crate::common::{Actor, DispatchError, DispatchResult, HelperId, TaskId, TaskStatus};
use crate::domains::tasks::models::{Task, TaskEvent};

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: TaskId) -> DispatchResult<Option<TaskStatus>> {
        let status = sqlx::query_scalar::<_, TaskStatus>("SELECT status FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }
}

async fn insert_event(tx: &mut Transaction<'_, Postgres>, event: &TaskEvent) -> DispatchResult<()> {
    sqlx::query(
        r#"
        INSERT INTO task_events (id, task_id, from_status, to_status, actor_id, details, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(event.id)
    .bind(event.task_id)
    .bind(event.from_status)
    .bind(event.to_status)
    .bind(event.actor_id)
    .bind(&event.details)
    .bind(event.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert(&self, task: &Task, actor: Actor) -> DispatchResult<Task> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (
                id, requester_id, helper_id, skill_id, latitude, longitude, cell_id,
                status, price_cents, description, dispatch_candidates, declined_helper_ids,
                created_at, updated_at
            )
            VALUES ($1, $2, NULL, $3, $4, $5, $6, $7, $8, $9, $10, '{}', $11, $11)
            RETURNING *
            "#,
        )
        .bind(task.id)
        .bind(task.requester_id)
        .bind(&task.skill_id)
        .bind(task.latitude)
        .bind(task.longitude)
        .bind(task.cell_id)
        .bind(task.status)
        .bind(task.price_cents)
        .bind(&task.description)
        .bind(&task.dispatch_candidates)
        .bind(task.created_at)
        .fetch_one(&mut *tx)
        .await?;

        let event = TaskEvent::new(
            inserted.id,
            None,
            inserted.status,
            actor,
            json!({ "skill_id": inserted.skill_id, "cell_id": inserted.cell_id }),
            inserted.created_at,
        );
        insert_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_by_id(&self, id: TaskId) -> DispatchResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn transition(&self, id: TaskId, change: StatusChange) -> DispatchResult<Task> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = $3,
                helper_id = CASE WHEN $4 THEN NULL ELSE helper_id END,
                dispatch_candidates = COALESCE($5, dispatch_candidates),
                declined_helper_ids = CASE WHEN $6 THEN '{}'::uuid[] ELSE declined_helper_ids END,
                failure_reason = $7,
                cancellation_reason = $8,
                cancelled_by = $9,
                started_at = COALESCE($10, started_at),
                finished_at = $11,
                updated_at = $12
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(change.from)
        .bind(change.to)
        .bind(change.clears_helper())
        .bind(change.candidates.clone().map(Json))
        .bind(change.resets_declines())
        .bind(change.failure_reason())
        .bind(change.cancellation_reason())
        .bind(if change.to == TaskStatus::Cancelled {
            change.actor.user_id()
        } else {
            None
        })
        .bind(change.started_at(now))
        .bind(change.finished_at(now))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(task) = updated else {
            tx.rollback().await?;
            return Err(missed_write(id, self.current_status(id).await?, change.from));
        };

        insert_event(&mut tx, &change.event(id, now)).await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn claim(&self, id: TaskId, helper_id: HelperId, actor: Actor) -> DispatchResult<Task> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = 'accepted', helper_id = $2, accepted_at = $3, updated_at = $3
            WHERE id = $1 AND status = 'dispatched' AND helper_id IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(helper_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(task) = claimed else {
            tx.rollback().await?;
            return Err(missed_claim(id, self.current_status(id).await?));
        };

        insert_event(&mut tx, &claim_event(id, helper_id, actor, now)).await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn record_decline(&self, id: TaskId, helper_id: HelperId) -> DispatchResult<Task> {
        let updated = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET declined_helper_ids = CASE
                    WHEN $2 = ANY(declined_helper_ids) THEN declined_helper_ids
                    ELSE array_append(declined_helper_ids, $2)
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'dispatched'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(helper_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(task) => Ok(task),
            None => match self.current_status(id).await? {
                None => Err(DispatchError::not_found("task", id)),
                Some(status) => Err(DispatchError::Conflict(format!(
                    "task {} is {}, no longer open for offers",
                    id, status
                ))),
            },
        }
    }

    async fn list_events(&self, id: TaskId) -> DispatchResult<Vec<TaskEvent>> {
        let events = sqlx::query_as::<_, TaskEvent>(
            "SELECT * FROM task_events WHERE task_id = $1 ORDER BY created_at, id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn find_stale(
        &self,
        statuses: &[TaskStatus],
        older_than: DateTime<Utc>,
    ) -> DispatchResult<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE status = ANY($1) AND updated_at < $2
            ORDER BY updated_at
            "#,
        )
        .bind(statuses.to_vec())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }
}
