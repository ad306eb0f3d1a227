use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{HelperId, Role, SessionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Finer-grained status a user (usually a helper) reports about themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Available,
    Busy,
    Away,
    InTask,
}

/// Client-reported metadata for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: Option<String>,
    pub app_version: Option<String>,
    pub user_agent: Option<String>,
}

/// One live client session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub role: Role,
    pub device: DeviceInfo,
    pub connected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Point-in-time view of a user's presence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub user_id: UserId,
    pub role: Role,
    pub helper_id: Option<HelperId>,
    pub status: PresenceStatus,
    pub activity: Option<ActivityStatus>,
    pub session_count: usize,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// Emitted whenever status or activity actually changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub user_id: UserId,
    pub role: Role,
    pub helper_id: Option<HelperId>,
    pub status: PresenceStatus,
    pub activity: Option<ActivityStatus>,
    pub at: DateTime<Utc>,
}
