//! Pure scoring functions for ranking candidates.
//!
//! No side effects: callers supply distance, skill weight and reputation,
//! these functions turn them into a comparable composite score.

use std::cmp::Ordering;

use crate::domains::matching::models::MatchCandidate;

pub const PROXIMITY_WEIGHT: f64 = 0.4;
pub const SKILL_WEIGHT: f64 = 0.25;
pub const RATING_WEIGHT: f64 = 0.2;
pub const RESPONSE_WEIGHT: f64 = 0.15;

/// Skill weight for a helper holding the required skill.
pub const SKILL_MATCH_EXACT: f64 = 1.0;
/// Skill weight for the lower-priority unskilled fallback.
pub const SKILL_MATCH_FALLBACK: f64 = 0.5;

pub const MAX_RATING: f64 = 5.0;
/// Completed-task count at which the response score saturates.
pub const RESPONSE_SATURATION: f64 = 100.0;

/// `1 / (1 + d)`: closer is higher, 1.0 at zero distance.
pub fn proximity_score(distance_km: f64) -> f64 {
    1.0 / (1.0 + distance_km.max(0.0))
}

pub fn rating_score(rating: f64) -> f64 {
    (rating / MAX_RATING).clamp(0.0, 1.0)
}

pub fn response_score(completed_task_count: i32) -> f64 {
    (completed_task_count.max(0) as f64 / RESPONSE_SATURATION).min(1.0)
}

pub fn composite_score(
    distance_km: f64,
    skill_match: f64,
    rating: f64,
    completed_task_count: i32,
) -> f64 {
    PROXIMITY_WEIGHT * proximity_score(distance_km)
        + SKILL_WEIGHT * skill_match
        + RATING_WEIGHT * rating_score(rating)
        + RESPONSE_WEIGHT * response_score(completed_task_count)
}

/// Highest score first; ties go to the closer helper.
pub fn rank_order(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(Ordering::Equal)
        })
}
