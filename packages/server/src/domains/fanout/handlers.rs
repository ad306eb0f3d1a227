//! Handlers wired into `ConsumerTable::standard()`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::consumer::EventHandler;
use super::events::{DispatchEvent, EventType};
use crate::domains::presence::{PresenceChange, PresenceStatus};
use crate::kernel::{CompletionNotice, ServerDeps};

fn push_copy(event_type: EventType) -> (&'static str, &'static str) {
    match event_type {
        EventType::TaskAssigned => ("New task nearby", "A task matching your skills is available"),
        EventType::TaskAccepted => ("Helper on the way", "A helper accepted your task"),
        EventType::TaskStarted => ("Task started", "Your helper has started working"),
        EventType::TaskCompleted => ("Task completed", "Your task has been completed"),
        EventType::TaskCancelled => ("Task cancelled", "The task has been cancelled"),
        EventType::TaskFailed => ("No helper found", "We could not find a helper for your task"),
        EventType::HelperArriving => ("Helper arriving", "Your helper is almost there"),
        EventType::HelperLocation | EventType::StatusChanged => ("", ""),
    }
}

/// Pushes to every addressee that has no live session.
#[derive(Debug, Clone, Copy, Default)]
pub struct PushFallbackHandler;

#[async_trait]
impl EventHandler for PushFallbackHandler {
    async fn handle(&self, event: &DispatchEvent, deps: &ServerDeps) -> Result<()> {
        if !event.event_type.pushes_offline_recipients() {
            return Ok(());
        }

        let offline: Vec<_> = event
            .audience()
            .into_iter()
            .filter(|user_id| !deps.presence.has_live_session(*user_id))
            .collect();
        if offline.is_empty() {
            return Ok(());
        }

        let (title, body) = push_copy(event.event_type);
        let data = json!({
            "event": event.event_type.channel(),
            "taskId": event.task_id,
        });
        debug!(event_id = %event.id, recipients = offline.len(), "Push fallback");

        deps.push_service
            .send_batch(
                offline
                    .into_iter()
                    .map(|user_id| (user_id, title.to_string(), body.to_string(), data.clone()))
                    .collect(),
            )
            .await
    }
}

/// Informs the ledger of a completed task, then pushes like any lifecycle event.
/// The task id doubles as idempotency key, so redelivery cannot settle twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementHandler;

#[async_trait]
impl EventHandler for SettlementHandler {
    async fn handle(&self, event: &DispatchEvent, deps: &ServerDeps) -> Result<()> {
        let task_id = event.task_id.context("completion event without task id")?;
        let task = deps
            .tasks
            .find_by_id(task_id)
            .await?
            .with_context(|| format!("completed task {} not found", task_id))?;
        let helper_id = task
            .helper_id
            .with_context(|| format!("completed task {} has no helper", task_id))?;

        deps.ledger
            .record_completion(CompletionNotice {
                idempotency_key: task_id.to_string(),
                task_id,
                requester_id: task.requester_id,
                helper_id,
                price_cents: task.price_cents,
            })
            .await?;
        info!(task_id = %task_id, "Completion sent to ledger");

        PushFallbackHandler.handle(event, deps).await
    }
}

/// Mirrors a helper's presence into the durable `is_online` flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceMirrorHandler;

#[async_trait]
impl EventHandler for PresenceMirrorHandler {
    async fn handle(&self, event: &DispatchEvent, deps: &ServerDeps) -> Result<()> {
        let change: PresenceChange = serde_json::from_value(event.payload.clone())
            .context("status change payload")?;
        let Some(helper_id) = change.helper_id else {
            return Ok(());
        };

        let online = change.status == PresenceStatus::Online;
        if !deps.helpers.set_online(helper_id, online, change.at).await? {
            debug!(helper_id = %helper_id, "Presence change not applied (missing helper or newer change)");
        }
        Ok(())
    }
}

/// Persists the helper's latest exact position and cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionHandler;

#[async_trait]
impl EventHandler for PositionHandler {
    async fn handle(&self, event: &DispatchEvent, deps: &ServerDeps) -> Result<()> {
        let (Some(helper_id), Some(position)) = (event.helper_id, event.source_position) else {
            return Ok(());
        };

        let cell = deps
            .spatial
            .cell_for(position, deps.config.spatial_resolution);
        let applied = deps
            .helpers
            .update_position(helper_id, position, cell, event.timestamp)
            .await?;
        if !applied {
            debug!(helper_id = %helper_id, "Older position sample ignored");
        }
        Ok(())
    }
}
