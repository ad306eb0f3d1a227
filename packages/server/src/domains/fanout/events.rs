use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use typed_builder::TypedBuilder;

use crate::common::{Coordinate, EventId, HelperId, Role, TaskId, UserId};
use crate::kernel::stream_hub::Room;

/// Every event class the core emits. Each maps to one broker subject and
/// one durable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskAssigned,
    TaskAccepted,
    TaskStarted,
    TaskCompleted,
    TaskCancelled,
    TaskFailed,
    HelperLocation,
    HelperArriving,
    StatusChanged,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::TaskAssigned,
        EventType::TaskAccepted,
        EventType::TaskStarted,
        EventType::TaskCompleted,
        EventType::TaskCancelled,
        EventType::TaskFailed,
        EventType::HelperLocation,
        EventType::HelperArriving,
        EventType::StatusChanged,
    ];

    /// Name on the client-facing real-time channel.
    pub fn channel(&self) -> &'static str {
        match self {
            EventType::TaskAssigned => "task:assigned",
            EventType::TaskAccepted => "task:accepted",
            EventType::TaskStarted => "task:started",
            EventType::TaskCompleted => "task:completed",
            EventType::TaskCancelled => "task:cancelled",
            EventType::TaskFailed => "task:failed",
            EventType::HelperLocation => "helper:location",
            EventType::HelperArriving => "helper:arriving",
            EventType::StatusChanged => "status:changed",
        }
    }

    /// Broker subject, under the `dispatch.>` stream.
    pub fn subject(&self) -> &'static str {
        match self {
            EventType::TaskAssigned => "dispatch.task.assigned",
            EventType::TaskAccepted => "dispatch.task.accepted",
            EventType::TaskStarted => "dispatch.task.started",
            EventType::TaskCompleted => "dispatch.task.completed",
            EventType::TaskCancelled => "dispatch.task.cancelled",
            EventType::TaskFailed => "dispatch.task.failed",
            EventType::HelperLocation => "dispatch.helper.location",
            EventType::HelperArriving => "dispatch.helper.arriving",
            EventType::StatusChanged => "dispatch.status.changed",
        }
    }

    /// Durable queue (consumer) name for this event class.
    pub fn queue(&self) -> String {
        self.subject().replace('.', "-")
    }

    pub fn from_subject(subject: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.subject() == subject)
    }

    pub fn default_priority(&self) -> EventPriority {
        match self {
            EventType::TaskAssigned | EventType::HelperArriving => EventPriority::High,
            EventType::HelperLocation | EventType::StatusChanged => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }

    /// Whether recipients without a live session get a push notification.
    pub fn pushes_offline_recipients(&self) -> bool {
        !matches!(self, EventType::HelperLocation | EventType::StatusChanged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Normal,
    High,
}

/// A typed fan-out event. Serialized as-is onto the broker; clients receive
/// only `envelope()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct DispatchEvent {
    #[builder(default = EventId::new())]
    pub id: EventId,
    pub event_type: EventType,
    #[builder(default, setter(strip_option))]
    pub task_id: Option<TaskId>,
    #[builder(default, setter(strip_option))]
    pub requester_id: Option<UserId>,
    #[builder(default, setter(into))]
    pub helper_id: Option<HelperId>,
    #[builder(default, setter(into))]
    pub actor_id: Option<UserId>,
    /// Users the event is addressed to, beyond whoever is in the task room.
    #[builder(default)]
    pub recipients: Vec<UserId>,
    #[builder(default = Value::Null)]
    pub payload: Value,
    /// Exact helper position. Broker-only, never part of the client envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub source_position: Option<Coordinate>,
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    #[builder(default = event_type.default_priority())]
    pub priority: EventPriority,
}

impl DispatchEvent {
    /// Rooms that receive this event live.
    pub fn live_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::new();
        if let Some(task_id) = self.task_id {
            rooms.push(Room::task(task_id));
        }
        if self.event_type == EventType::StatusChanged {
            rooms.push(Room::role(Role::Admin));
        }
        rooms.extend(self.recipients.iter().copied().map(Room::user));
        rooms
    }

    /// Everyone who should eventually hear about the event, live or by push.
    pub fn audience(&self) -> Vec<UserId> {
        let mut audience = self.recipients.clone();
        if let Some(requester_id) = self.requester_id {
            audience.push(requester_id);
        }
        audience.sort();
        audience.dedup();
        if let Some(actor_id) = self.actor_id {
            audience.retain(|u| *u != actor_id);
        }
        audience
    }

    /// Client-facing JSON.
    pub fn envelope(&self) -> Value {
        json!({
            "event": self.event_type.channel(),
            "eventId": self.id,
            "taskId": self.task_id,
            "data": self.payload,
            "timestamp": self.timestamp,
            "priority": self.priority,
        })
    }
}
