//! Test fixtures for creating identities, helpers and tasks.

use chrono::Utc;
use dispatch_core::common::{Actor, AuthUser, Coordinate, Role, UserId};
use dispatch_core::domains::helpers::{HelperAvailability, VerificationStatus};
use dispatch_core::domains::tasks::actions::create_task;
use dispatch_core::domains::tasks::{NewTask, Task};
use dispatch_core::kernel::ServerDeps;

/// Madhapur, Hyderabad.
pub const HYDERABAD: Coordinate = Coordinate {
    latitude: 17.45,
    longitude: 78.391,
};

pub const TAP_REPAIR: &str = "plumbing.tap_repair";

pub fn requester() -> AuthUser {
    AuthUser {
        user_id: UserId::new(),
        role: Role::Requester,
        helper_id: None,
    }
}

pub fn admin() -> AuthUser {
    AuthUser {
        user_id: UserId::new(),
        role: Role::Admin,
        helper_id: None,
    }
}

/// Identity for an existing helper profile.
pub fn helper_identity(helper: &HelperAvailability) -> AuthUser {
    AuthUser {
        user_id: helper.user_id,
        role: Role::Helper,
        helper_id: Some(helper.id),
    }
}

/// Shape of a seeded helper. Defaults to an online, verified helper holding
/// `TAP_REPAIR` at `HYDERABAD`.
#[derive(Debug, Clone)]
pub struct HelperSeed {
    pub position: Coordinate,
    pub skills: Vec<String>,
    pub rating: f64,
    pub completed_task_count: i32,
    pub online: bool,
    pub verification: VerificationStatus,
}

impl Default for HelperSeed {
    fn default() -> Self {
        Self {
            position: HYDERABAD,
            skills: vec![TAP_REPAIR.to_string()],
            rating: 4.5,
            completed_task_count: 50,
            online: true,
            verification: VerificationStatus::Verified,
        }
    }
}

impl HelperSeed {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            position: Coordinate::new(latitude, longitude),
            ..Self::default()
        }
    }
}

/// Insert a helper indexed at its position's cell.
pub async fn seed_helper(deps: &ServerDeps, seed: HelperSeed) -> HelperAvailability {
    let now = Utc::now();
    let mut helper = HelperAvailability::new(UserId::new());
    helper.is_online = seed.online;
    helper.latitude = Some(seed.position.latitude);
    helper.longitude = Some(seed.position.longitude);
    helper.cell_id = Some(
        deps.spatial
            .cell_for(seed.position, deps.config.spatial_resolution),
    );
    helper.verification_status = seed.verification;
    helper.rating = seed.rating;
    helper.completed_task_count = seed.completed_task_count;
    helper.skills = seed.skills;
    helper.last_heartbeat_at = Some(now);
    helper.position_updated_at = Some(now);

    deps.helpers
        .insert(&helper)
        .await
        .expect("helper insert should succeed");
    helper
}

/// Create a task through the real action (CREATED, queued for matching).
pub async fn submit_task(deps: &ServerDeps, owner: &AuthUser, at: Coordinate, skill: &str) -> Task {
    let new_task = NewTask::builder()
        .requester_id(owner.user_id)
        .skill_id(skill)
        .coordinate(at)
        .price_cents(25_000i64)
        .build();

    create_task(deps, Actor::from(owner), new_task)
        .await
        .expect("task creation should succeed")
}

/// Persist a CREATED task without queuing it, as a stopped process leaves it.
pub async fn orphaned_task(deps: &ServerDeps, owner: &AuthUser, at: Coordinate, skill: &str) -> Task {
    let cell = deps.spatial.cell_for(at, deps.config.spatial_resolution);
    let task = NewTask::builder()
        .requester_id(owner.user_id)
        .skill_id(skill)
        .coordinate(at)
        .price_cents(25_000i64)
        .build()
        .into_task(cell);

    deps.tasks
        .insert(&task, Actor::from(owner))
        .await
        .expect("task insert should succeed")
}
