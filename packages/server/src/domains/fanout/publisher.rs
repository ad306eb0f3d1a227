use std::sync::Arc;
use tracing::debug;

use super::events::DispatchEvent;
use crate::common::{DispatchError, DispatchResult};
use crate::kernel::broker::BaseBroker;
use crate::kernel::stream_hub::StreamHub;

/// Delivers an event live to connected sessions and durably to the broker.
#[derive(Clone)]
pub struct EventPublisher {
    hub: StreamHub,
    broker: Arc<dyn BaseBroker>,
}

impl EventPublisher {
    pub fn new(hub: StreamHub, broker: Arc<dyn BaseBroker>) -> Self {
        Self { hub, broker }
    }

    /// Live delivery never fails; the broker publish may, and surfaces as
    /// `UpstreamUnavailable`.
    pub async fn publish(&self, event: &DispatchEvent) -> DispatchResult<()> {
        let live = self
            .hub
            .publish_many(&event.live_rooms(), &event.envelope())
            .await;

        let payload = serde_json::to_vec(event)?;
        self.broker
            .publish(event.event_type.subject(), payload.into())
            .await
            .map_err(|e| DispatchError::UpstreamUnavailable(format!("broker: {}", e)))?;

        debug!(
            event_id = %event.id,
            event = event.event_type.channel(),
            live_receivers = live,
            "Published event"
        );
        Ok(())
    }
}
