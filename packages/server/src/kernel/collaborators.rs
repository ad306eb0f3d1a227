//! Default collaborator implementations used outside of tests.
//!
//! Push delivery and ledger bookkeeping belong to other services; until those
//! are wired, the logging implementations record what would have been sent.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::info;

use super::traits::{
    BaseLedgerService, BasePushNotificationService, BaseSkillCatalog, CompletionNotice,
};
use crate::common::UserId;

// =============================================================================
// Skill catalogs
// =============================================================================

/// Reads the `skills` table maintained by the taxonomy service.
pub struct PostgresSkillCatalog {
    pool: PgPool,
}

impl PostgresSkillCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseSkillCatalog for PostgresSkillCatalog {
    async fn skill_exists(&self, skill_id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM skills WHERE id = $1 AND is_active = TRUE)",
        )
        .bind(skill_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

/// Fixed skill set. `None` accepts every skill (memory-mode runs).
pub struct StaticSkillCatalog {
    skills: Option<HashSet<String>>,
}

impl StaticSkillCatalog {
    pub fn new<I, S>(skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            skills: Some(skills.into_iter().map(Into::into).collect()),
        }
    }

    pub fn allow_all() -> Self {
        Self { skills: None }
    }
}

#[async_trait]
impl BaseSkillCatalog for StaticSkillCatalog {
    async fn skill_exists(&self, skill_id: &str) -> Result<bool> {
        Ok(self
            .skills
            .as_ref()
            .map(|skills| skills.contains(skill_id))
            .unwrap_or(true))
    }
}

// =============================================================================
// Logging push / ledger
// =============================================================================

pub struct LoggingPushService;

#[async_trait]
impl BasePushNotificationService for LoggingPushService {
    async fn send_notification(
        &self,
        user_id: UserId,
        title: &str,
        _body: &str,
        _data: serde_json::Value,
    ) -> Result<()> {
        info!(user_id = %user_id, title, "Push notification (no provider configured)");
        Ok(())
    }
}

pub struct LoggingLedgerService;

#[async_trait]
impl BaseLedgerService for LoggingLedgerService {
    async fn record_completion(&self, notice: CompletionNotice) -> Result<()> {
        info!(
            task_id = %notice.task_id,
            helper_id = %notice.helper_id,
            price_cents = notice.price_cents,
            idempotency_key = %notice.idempotency_key,
            "Completion recorded for settlement"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_catalog() {
        let catalog = StaticSkillCatalog::new(["plumbing.tap_repair"]);
        assert!(catalog.skill_exists("plumbing.tap_repair").await.unwrap());
        assert!(!catalog.skill_exists("astrology").await.unwrap());

        let open = StaticSkillCatalog::allow_all();
        assert!(open.skill_exists("anything").await.unwrap());
    }
}
