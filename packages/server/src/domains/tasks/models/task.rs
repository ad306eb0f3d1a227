use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use typed_builder::TypedBuilder;

use crate::common::{Coordinate, HelperId, TaskId, TaskStatus, UserId};
use crate::domains::matching::MatchCandidate;
use crate::domains::spatial::CellId;

/// A unit of requested work.
///
/// `helper_id` is non-null only in ACCEPTED, IN_PROGRESS and COMPLETED.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: TaskId,
    pub requester_id: UserId,
    pub helper_id: Option<HelperId>,
    pub skill_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub cell_id: CellId,
    pub status: TaskStatus,
    pub price_cents: i64,
    pub description: Option<String>,
    /// Shortlist offered on the last dispatch.
    pub dispatch_candidates: Json<Vec<MatchCandidate>>,
    /// Offered helpers that declined during the current dispatch round.
    pub declined_helper_ids: Vec<HelperId>,
    pub failure_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<UserId>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn was_offered_to(&self, helper_id: HelperId) -> bool {
        self.dispatch_candidates
            .iter()
            .any(|c| c.helper_id == helper_id)
    }

    /// Every offered helper has declined this round.
    pub fn all_candidates_declined(&self) -> bool {
        !self.dispatch_candidates.is_empty()
            && self
                .dispatch_candidates
                .iter()
                .all(|c| self.declined_helper_ids.contains(&c.helper_id))
    }

    /// Requester, assigned helper, or admin.
    pub fn is_participant(&self, user_id: UserId, helper_id: Option<HelperId>) -> bool {
        self.requester_id == user_id || (helper_id.is_some() && self.helper_id == helper_id)
    }
}

/// Parameters for submitting a task.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewTask {
    pub requester_id: UserId,
    pub skill_id: String,
    pub coordinate: Coordinate,
    #[builder(default)]
    pub price_cents: i64,
    #[builder(default)]
    pub description: Option<String>,
}

impl NewTask {
    /// Materialise a CREATED row for `cell`.
    pub fn into_task(self, cell_id: CellId) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new(),
            requester_id: self.requester_id,
            helper_id: None,
            skill_id: self.skill_id,
            latitude: self.coordinate.latitude,
            longitude: self.coordinate.longitude,
            cell_id,
            status: TaskStatus::Created,
            price_cents: self.price_cents,
            description: self.description,
            dispatch_candidates: Json(Vec::new()),
            declined_helper_ids: Vec::new(),
            failure_reason: None,
            cancellation_reason: None,
            cancelled_by: None,
            accepted_at: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
