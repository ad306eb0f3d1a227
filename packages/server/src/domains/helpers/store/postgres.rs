use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::HelperStore;
use crate::common::{Coordinate, DispatchResult, HelperId, TaskId};
use crate::domains::helpers::models::helper::HelperAvailability;
use crate::domains::spatial::CellId;

const HELPER_COLUMNS: &str = r#"
    h.id, h.user_id, h.is_online, h.latitude, h.longitude, h.cell_id,
    h.verification_status, h.rating, h.completed_task_count,
    h.last_heartbeat_at, h.position_updated_at, h.presence_changed_at, h.current_task_id,
    ARRAY(SELECT hs.skill_id FROM helper_skills hs WHERE hs.helper_id = h.id ORDER BY hs.skill_id) AS skills,
    h.created_at, h.updated_at
"#;

pub struct PostgresHelperStore {
    pool: PgPool,
}

impl PostgresHelperStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HelperStore for PostgresHelperStore {
    async fn insert(&self, helper: &HelperAvailability) -> DispatchResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO helpers (
                id, user_id, is_online, latitude, longitude, cell_id,
                verification_status, rating, completed_task_count,
                last_heartbeat_at, position_updated_at, presence_changed_at,
                current_task_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(helper.id)
        .bind(helper.user_id)
        .bind(helper.is_online)
        .bind(helper.latitude)
        .bind(helper.longitude)
        .bind(helper.cell_id)
        .bind(helper.verification_status)
        .bind(helper.rating)
        .bind(helper.completed_task_count)
        .bind(helper.last_heartbeat_at)
        .bind(helper.position_updated_at)
        .bind(helper.presence_changed_at)
        .bind(helper.current_task_id)
        .bind(helper.created_at)
        .bind(helper.updated_at)
        .execute(&mut *tx)
        .await?;

        for skill in &helper.skills {
            sqlx::query("INSERT INTO helper_skills (helper_id, skill_id) VALUES ($1, $2)")
                .bind(helper.id)
                .bind(skill)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: HelperId) -> DispatchResult<Option<HelperAvailability>> {
        let query = format!("SELECT {} FROM helpers h WHERE h.id = $1", HELPER_COLUMNS);
        let helper = sqlx::query_as::<_, HelperAvailability>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(helper)
    }

    async fn find_available_in_cells(
        &self,
        cells: &[CellId],
    ) -> DispatchResult<Vec<HelperAvailability>> {
        if cells.is_empty() {
            return Ok(Vec::new());
        }
        let raw_cells: Vec<i64> = cells.iter().map(CellId::as_i64).collect();

        let query = format!(
            r#"
            SELECT {}
            FROM helpers h
            WHERE h.cell_id = ANY($1)
              AND h.is_online = TRUE
              AND h.verification_status = 'verified'
              AND h.current_task_id IS NULL
            "#,
            HELPER_COLUMNS
        );
        let helpers = sqlx::query_as::<_, HelperAvailability>(&query)
            .bind(raw_cells)
            .fetch_all(&self.pool)
            .await?;
        Ok(helpers)
    }

    async fn set_online(&self, id: HelperId, online: bool, at: DateTime<Utc>) -> DispatchResult<bool> {
        // Redelivered or reordered changes never roll presence back
        let result = sqlx::query(
            r#"
            UPDATE helpers
            SET is_online = $2,
                presence_changed_at = $3,
                last_heartbeat_at = CASE WHEN $2 THEN $3 ELSE last_heartbeat_at END,
                updated_at = $3
            WHERE id = $1
              AND (presence_changed_at IS NULL OR presence_changed_at <= $3)
            "#,
        )
        .bind(id)
        .bind(online)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_heartbeat(&self, id: HelperId, at: DateTime<Utc>) -> DispatchResult<bool> {
        let result = sqlx::query(
            "UPDATE helpers SET last_heartbeat_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_position(
        &self,
        id: HelperId,
        position: Coordinate,
        cell: CellId,
        at: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        // Older samples never overwrite newer ones
        let result = sqlx::query(
            r#"
            UPDATE helpers
            SET latitude = $2, longitude = $3, cell_id = $4,
                position_updated_at = $5, updated_at = $5
            WHERE id = $1
              AND (position_updated_at IS NULL OR position_updated_at <= $5)
            "#,
        )
        .bind(id)
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(cell)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_occupy(&self, id: HelperId, task_id: TaskId) -> DispatchResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE helpers
            SET current_task_id = $2, updated_at = NOW()
            WHERE id = $1 AND current_task_id IS NULL
            "#,
        )
        .bind(id)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, id: HelperId, task_id: TaskId) -> DispatchResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE helpers
            SET current_task_id = NULL, updated_at = NOW()
            WHERE id = $1 AND current_task_id = $2
            "#,
        )
        .bind(id)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_occupancy(&self, id: HelperId, task_id: TaskId) -> DispatchResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE helpers
            SET current_task_id = NULL,
                completed_task_count = completed_task_count + 1,
                updated_at = NOW()
            WHERE id = $1 AND current_task_id = $2
            "#,
        )
        .bind(id)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
