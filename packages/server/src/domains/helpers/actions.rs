//! Helper self-service actions: online status and heartbeat.

use chrono::Utc;
use tracing::{debug, info, instrument};

use super::models::helper::HelperAvailability;
use crate::common::{AuthUser, Coordinate, DispatchError, DispatchResult};
use crate::domains::presence::{actions as presence_actions, ActivityStatus};
use crate::kernel::ServerDeps;

/// Go online or offline, optionally with an activity status.
#[instrument(skip(deps, user), fields(user_id = %user.user_id))]
pub async fn set_status(
    deps: &ServerDeps,
    user: &AuthUser,
    online: bool,
    activity: Option<ActivityStatus>,
) -> DispatchResult<HelperAvailability> {
    let helper_id = user.require_helper()?;
    let now = Utc::now();

    if !deps.helpers.set_online(helper_id, online, now).await? {
        if deps.helpers.find_by_id(helper_id).await?.is_none() {
            return Err(DispatchError::not_found("helper", helper_id));
        }
        debug!(helper_id = %helper_id, "Newer presence change already recorded");
    }

    if online {
        presence_actions::heartbeat(deps, user).await;
        if let Some(activity) = activity {
            presence_actions::set_activity(deps, user.user_id, activity).await;
        }
    } else {
        presence_actions::go_offline(deps, user.user_id).await;
    }
    info!(helper_id = %helper_id, online, "Helper status set");

    deps.helpers
        .find_by_id(helper_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("helper", helper_id))
}

/// Liveness ping, optionally carrying the helper's current position.
#[instrument(skip(deps, user, position), fields(user_id = %user.user_id))]
pub async fn heartbeat(
    deps: &ServerDeps,
    user: &AuthUser,
    position: Option<Coordinate>,
) -> DispatchResult<()> {
    let helper_id = user.require_helper()?;
    if let Some(position) = position {
        position.validate()?;
    }
    let now = Utc::now();

    if !deps.helpers.record_heartbeat(helper_id, now).await? {
        return Err(DispatchError::not_found("helper", helper_id));
    }

    if let Some(position) = position {
        let cell = deps
            .spatial
            .cell_for(position, deps.config.spatial_resolution);
        if !deps
            .helpers
            .update_position(helper_id, position, cell, now)
            .await?
        {
            debug!(helper_id = %helper_id, "Newer position already recorded");
        }
    }

    presence_actions::heartbeat(deps, user).await;
    Ok(())
}
