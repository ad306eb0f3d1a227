use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{Coordinate, HelperId, TaskId, UserId};
use crate::domains::spatial::CellId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "verification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
    Suspended,
}

/// A helper's live dispatch-relevant state.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HelperAvailability {
    pub id: HelperId,
    pub user_id: UserId,
    pub is_online: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub cell_id: Option<CellId>,
    pub verification_status: VerificationStatus,
    pub rating: f64,
    pub completed_task_count: i32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub position_updated_at: Option<DateTime<Utc>>,
    /// Time of the presence change last mirrored into `is_online`.
    pub presence_changed_at: Option<DateTime<Utc>>,
    /// Set while the helper is occupied by an accepted task.
    pub current_task_id: Option<TaskId>,
    pub skills: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HelperAvailability {
    /// A fresh, offline, unverified profile. Used by onboarding fixtures.
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: HelperId::new(),
            user_id,
            is_online: false,
            latitude: None,
            longitude: None,
            cell_id: None,
            verification_status: VerificationStatus::Pending,
            rating: 0.0,
            completed_task_count: 0,
            last_heartbeat_at: None,
            position_updated_at: None,
            presence_changed_at: None,
            current_task_id: None,
            skills: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn position(&self) -> Option<Coordinate> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
            _ => None,
        }
    }

    pub fn has_skill(&self, skill_id: &str) -> bool {
        self.skills.iter().any(|s| s == skill_id)
    }

    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationStatus::Verified
    }

    /// Online, verified and not occupied by another task.
    pub fn is_dispatchable(&self) -> bool {
        self.is_online && self.is_verified() && self.current_task_id.is_none()
    }
}
