// Trait definitions for external collaborators
//
// These are INFRASTRUCTURE traits only - no business logic.
// Dispatch rules live in the domains and call through these seams.
//
// Naming convention: Base* for trait names (e.g., BaseLedgerService)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{HelperId, TaskId, UserId};

// =============================================================================
// Skill Catalog Trait (read-only taxonomy)
// =============================================================================

#[async_trait]
pub trait BaseSkillCatalog: Send + Sync {
    /// Whether `skill_id` is a known, active skill
    async fn skill_exists(&self, skill_id: &str) -> Result<bool>;
}

// =============================================================================
// Push Notification Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BasePushNotificationService: Send + Sync {
    /// Send a push notification to every device registered for a user
    async fn send_notification(
        &self,
        user_id: UserId,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> Result<()>;

    /// Send multiple notifications in batch
    async fn send_batch(
        &self,
        notifications: Vec<(UserId, String, String, serde_json::Value)>,
    ) -> Result<()> {
        for (user_id, title, body, data) in notifications {
            self.send_notification(user_id, &title, &body, data).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Ledger Trait (payment bookkeeping lives upstream)
// =============================================================================

/// Notice that a task completed and is ready for settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionNotice {
    /// Equal to the task id; the ledger must treat repeats as no-ops.
    pub idempotency_key: String,
    pub task_id: TaskId,
    pub requester_id: UserId,
    pub helper_id: HelperId,
    pub price_cents: i64,
}

#[async_trait]
pub trait BaseLedgerService: Send + Sync {
    async fn record_completion(&self, notice: CompletionNotice) -> Result<()>;
}
