// TestDependencies - mock implementations for testing
//
// Provides in-memory stores and recording collaborators that can be wired
// into ServerDeps for unit and integration tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::broker::InMemoryBroker;
use super::collaborators::StaticSkillCatalog;
use super::deps::{Collaborators, ServerDeps};
use super::dispatch_pool::DispatchWorkers;
use super::{BaseLedgerService, BasePushNotificationService, CompletionNotice};
use crate::common::UserId;
use crate::config::DispatchConfig;
use crate::domains::helpers::InMemoryHelperStore;
use crate::domains::spatial::HexGrid;
use crate::domains::tasks::InMemoryTaskStore;

// =============================================================================
// Mock Push Notification Service
// =============================================================================

/// One captured push.
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub user_id: UserId,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

#[derive(Default)]
pub struct MockPushNotificationService {
    sent_notifications: Arc<Mutex<Vec<SentNotification>>>,
}

impl MockPushNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all notifications that were sent
    pub fn sent_notifications(&self) -> Vec<SentNotification> {
        self.sent_notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Check if a notification was sent with the given title
    pub fn was_sent_with_title(&self, title: &str) -> bool {
        self.sent_notifications().iter().any(|n| n.title == title)
    }

    pub fn sent_to(&self, user_id: UserId) -> Vec<SentNotification> {
        self.sent_notifications()
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect()
    }
}

#[async_trait]
impl BasePushNotificationService for MockPushNotificationService {
    async fn send_notification(
        &self,
        user_id: UserId,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        self.sent_notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentNotification {
                user_id,
                title: title.to_string(),
                body: body.to_string(),
                data,
            });
        Ok(())
    }
}

// =============================================================================
// Mock Ledger
// =============================================================================

/// Ledger that honours idempotency keys and can be told to fail.
#[derive(Default)]
pub struct MockLedgerService {
    recorded: Mutex<Vec<CompletionNotice>>,
    seen_keys: Mutex<HashSet<String>>,
    attempts: Mutex<usize>,
    failures_remaining: Mutex<usize>,
}

impl MockLedgerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls.
    pub fn failing(self, count: usize) -> Self {
        *self
            .failures_remaining
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = count;
        self
    }

    /// Distinct settlements.
    pub fn recorded(&self) -> Vec<CompletionNotice> {
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every call, including failed and duplicate ones.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BaseLedgerService for MockLedgerService {
    async fn record_completion(&self, notice: CompletionNotice) -> Result<()> {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        {
            let mut remaining = self
                .failures_remaining
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("ledger unavailable");
            }
        }

        let fresh = self
            .seen_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(notice.idempotency_key.clone());
        if fresh {
            self.recorded
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(notice);
        }
        Ok(())
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub tasks: Arc<InMemoryTaskStore>,
    pub helpers: Arc<InMemoryHelperStore>,
    pub skills: Arc<StaticSkillCatalog>,
    pub broker: InMemoryBroker,
    pub push_service: Arc<MockPushNotificationService>,
    pub ledger: Arc<MockLedgerService>,
    pub config: DispatchConfig,
}

impl TestDependencies {
    pub fn new() -> Self {
        let config = DispatchConfig::default();
        Self {
            tasks: Arc::new(InMemoryTaskStore::new()),
            helpers: Arc::new(InMemoryHelperStore::new()),
            skills: Arc::new(StaticSkillCatalog::allow_all()),
            broker: InMemoryBroker::new(config.broker_max_deliver),
            push_service: Arc::new(MockPushNotificationService::new()),
            ledger: Arc::new(MockLedgerService::new()),
            config,
        }
    }

    /// Restrict the catalog to `skills`
    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = Arc::new(StaticSkillCatalog::new(skills));
        self
    }

    pub fn mock_ledger(mut self, ledger: MockLedgerService) -> Self {
        self.ledger = Arc::new(ledger);
        self
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.broker = InMemoryBroker::new(config.broker_max_deliver);
        self.config = config;
        self
    }

    /// Convert into ServerDeps for testing. The dispatch workers are
    /// returned unstarted.
    pub fn into_deps(self) -> (ServerDeps, DispatchWorkers) {
        ServerDeps::new(
            Collaborators {
                tasks: self.tasks,
                helpers: self.helpers,
                skills: self.skills,
                spatial: Arc::new(HexGrid::new()),
                broker: Arc::new(self.broker),
                push_service: self.push_service,
                ledger: self.ledger,
            },
            self.config,
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
