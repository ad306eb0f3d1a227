use serde::{Deserialize, Serialize};

use crate::common::{HelperId, UserId};

/// One ranked helper from a matching run.
///
/// Not persisted on its own; the shortlist is attached to the task as its
/// dispatch offer list when the task moves to DISPATCHED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub helper_id: HelperId,
    pub user_id: UserId,
    pub distance_km: f64,
    pub eta_minutes: u32,
    /// 1.0 when the helper holds the required skill, 0.5 for the unskilled fallback.
    pub skill_match: f64,
    pub rating: f64,
    pub score: f64,
}
