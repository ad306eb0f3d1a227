//! Broker consumption: one dispatch table, one generic loop.
//!
//! ```text
//! ConsumerTable { EventType -> EventHandler }
//!        │
//!        └─► per entry: broker.subscribe(queue, subject) ─► consume_queue()
//!                                                             │
//!                     ok ─► ack        err ─► nack (redeliver) or, on the
//!                                             last attempt, terminate
//! ```

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{DispatchEvent, EventType};
use super::handlers::{PositionHandler, PresenceMirrorHandler, PushFallbackHandler, SettlementHandler};
use super::stats::QueueCounters;
use crate::kernel::broker::{Delivery, DeliveryStream};
use crate::kernel::ServerDeps;

/// Handles one event class. Returning `Err` nacks the delivery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DispatchEvent, deps: &ServerDeps) -> Result<()>;
}

/// Maps each event type to exactly one handler (and so one queue).
#[derive(Clone, Default)]
pub struct ConsumerTable {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl ConsumerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production wiring.
    pub fn standard() -> Self {
        let push = PushFallbackHandler;
        Self::new()
            .with(EventType::TaskAssigned, push)
            .with(EventType::TaskAccepted, push)
            .with(EventType::TaskStarted, push)
            .with(EventType::TaskCancelled, push)
            .with(EventType::TaskFailed, push)
            .with(EventType::HelperArriving, push)
            .with(EventType::TaskCompleted, SettlementHandler)
            .with(EventType::StatusChanged, PresenceMirrorHandler)
            .with(EventType::HelperLocation, PositionHandler)
    }

    /// Register `handler` for `event_type`, replacing any previous one.
    pub fn with(mut self, event_type: EventType, handler: impl EventHandler + 'static) -> Self {
        self.handlers.insert(event_type, Arc::new(handler));
        self
    }

    pub fn event_types(&self) -> Vec<EventType> {
        EventType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Subscribe every table entry and spawn its consume loop.
pub async fn run_consumers(
    deps: ServerDeps,
    table: ConsumerTable,
    shutdown: CancellationToken,
) -> Result<Vec<JoinHandle<()>>> {
    let max_deliver = u64::from(deps.config.broker_max_deliver.max(1));
    let mut handles = Vec::with_capacity(table.len());

    for event_type in table.event_types() {
        let Some(handler) = table.handlers.get(&event_type).cloned() else {
            continue;
        };
        let queue = event_type.queue();
        let stream = deps.broker.subscribe(&queue, event_type.subject()).await?;
        let counters = deps.consumer_stats.counters(&queue);

        handles.push(tokio::spawn(consume_queue(
            queue,
            stream,
            handler,
            deps.clone(),
            counters,
            max_deliver,
            shutdown.clone(),
        )));
    }

    info!(consumers = handles.len(), "Broker consumers started");
    Ok(handles)
}

async fn consume_queue(
    queue: String,
    mut stream: DeliveryStream,
    handler: Arc<dyn EventHandler>,
    deps: ServerDeps,
    counters: Arc<QueueCounters>,
    max_deliver: u64,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                settle(&queue, delivery, handler.as_ref(), &deps, &counters, max_deliver).await
            }
            Some(Err(e)) => warn!(queue = %queue, error = %e, "Broker stream error"),
            None => break,
        }
    }
    debug!(queue = %queue, "Consumer stopped");
}

async fn settle(
    queue: &str,
    delivery: Delivery,
    handler: &dyn EventHandler,
    deps: &ServerDeps,
    counters: &QueueCounters,
    max_deliver: u64,
) {
    let event: DispatchEvent = match serde_json::from_slice(&delivery.payload) {
        Ok(event) => event,
        Err(e) => {
            error!(queue, subject = %delivery.subject, error = %e, "Malformed event, terminating");
            counters.record_malformed();
            if let Err(e) = delivery.terminate().await {
                warn!(queue, error = %e, "Failed to terminate delivery");
            }
            return;
        }
    };

    let attempt = delivery.attempt;
    let settled = match handler.handle(&event, deps).await {
        Ok(()) => {
            counters.record_ack();
            delivery.ack().await
        }
        Err(e) if attempt >= max_deliver => {
            error!(
                queue,
                event_id = %event.id,
                attempt,
                error = %e,
                "Handler failed on final attempt, dead-lettering"
            );
            counters.record_dead_letter();
            delivery.terminate().await
        }
        Err(e) => {
            warn!(queue, event_id = %event.id, attempt, error = %e, "Handler failed, redelivering");
            counters.record_nack();
            delivery.nack().await
        }
    };

    if let Err(e) = settled {
        warn!(queue, event_id = %event.id, error = %e, "Failed to settle delivery");
    }
}
