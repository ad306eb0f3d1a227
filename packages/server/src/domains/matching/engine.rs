use tracing::{debug, info, instrument};

use super::models::MatchCandidate;
use super::utils::{composite_score, rank_order, SKILL_MATCH_EXACT, SKILL_MATCH_FALLBACK};
use crate::common::utils::estimate_eta_minutes;
use crate::common::{Coordinate, DispatchResult};
use crate::config::DispatchConfig;
use crate::domains::helpers::{HelperAvailability, HelperStore};
use crate::domains::spatial::{CellId, SpatialIndex};

/// Input to one matching run.
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub cell: CellId,
    pub coordinate: Coordinate,
    pub skill_id: String,
    pub top_k: usize,
}

/// Find and rank helpers for a task.
///
/// Strategy:
/// 1. Expand `k = 0..=K_MAX` around the task cell
/// 2. At each radius, load dispatchable helpers inside the disk
/// 3. Stop at the first radius with any candidate (rings are never merged)
/// 4. Score, sort by score then distance, truncate to top-K
///
/// Returns an empty list when every ring is empty; that is a match
/// failure for the caller, not an error.
#[instrument(skip(helpers, spatial, config), fields(cell = %request.cell, skill = %request.skill_id))]
pub async fn find_helpers(
    request: &MatchRequest,
    helpers: &dyn HelperStore,
    spatial: &dyn SpatialIndex,
    config: &DispatchConfig,
) -> DispatchResult<Vec<MatchCandidate>> {
    for k in 0..=config.match_max_ring {
        let cells = spatial.grid_disk(request.cell, k);
        let available = helpers.find_available_in_cells(&cells).await?;

        let mut candidates: Vec<MatchCandidate> = available
            .iter()
            .filter(|helper| helper.is_dispatchable())
            .filter_map(|helper| score_helper(helper, request, spatial, config))
            .collect();

        if candidates.is_empty() {
            debug!(k, cells = cells.len(), "Ring empty, expanding");
            continue;
        }

        candidates.sort_by(rank_order);
        candidates.truncate(request.top_k);

        info!(k, found = candidates.len(), "Matched helpers");
        return Ok(candidates);
    }

    info!(max_ring = config.match_max_ring, "No helpers found in any ring");
    Ok(Vec::new())
}

fn score_helper(
    helper: &HelperAvailability,
    request: &MatchRequest,
    spatial: &dyn SpatialIndex,
    config: &DispatchConfig,
) -> Option<MatchCandidate> {
    let skill_match = if helper.has_skill(&request.skill_id) {
        SKILL_MATCH_EXACT
    } else if config.allow_unskilled_fallback {
        SKILL_MATCH_FALLBACK
    } else {
        return None;
    };

    // Helpers are indexed by cell; fall back to the cell center if the
    // raw coordinate was not retained.
    let position = helper
        .position()
        .or_else(|| helper.cell_id.map(|cell| spatial.cell_center(cell)))?;
    let distance_km = request.coordinate.distance_km(&position);

    Some(MatchCandidate {
        helper_id: helper.id,
        user_id: helper.user_id,
        distance_km,
        eta_minutes: estimate_eta_minutes(distance_km, config.assumed_speed_kmh),
        skill_match,
        rating: helper.rating,
        score: composite_score(
            distance_km,
            skill_match,
            helper.rating,
            helper.completed_task_count,
        ),
    })
}
