//! Helper persistence.
//!
//! [`PostgresHelperStore`] is the durable implementation; [`InMemoryHelperStore`]
//! has the same conditional-update semantics and backs tests and memory-mode runs.

mod memory;
mod postgres;

pub use memory::InMemoryHelperStore;
pub use postgres::PostgresHelperStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::helper::HelperAvailability;
use crate::common::{Coordinate, DispatchResult, HelperId, TaskId};
use crate::domains::spatial::CellId;

#[async_trait]
pub trait HelperStore: Send + Sync {
    /// Insert a profile with its skills. Profiles are provisioned by onboarding.
    async fn insert(&self, helper: &HelperAvailability) -> DispatchResult<()>;

    async fn find_by_id(&self, id: HelperId) -> DispatchResult<Option<HelperAvailability>>;

    /// Online, verified, unoccupied helpers whose current cell is in `cells`.
    /// Skill filtering and weighting is left to the caller.
    async fn find_available_in_cells(
        &self,
        cells: &[CellId],
    ) -> DispatchResult<Vec<HelperAvailability>>;

    /// Apply a presence change observed at `at`. Returns false if the helper
    /// does not exist or a newer change has already been applied.
    async fn set_online(&self, id: HelperId, online: bool, at: DateTime<Utc>) -> DispatchResult<bool>;

    async fn record_heartbeat(&self, id: HelperId, at: DateTime<Utc>) -> DispatchResult<bool>;

    async fn update_position(
        &self,
        id: HelperId,
        position: Coordinate,
        cell: CellId,
        at: DateTime<Utc>,
    ) -> DispatchResult<bool>;

    /// Mark the helper occupied by `task_id` only if currently unoccupied.
    async fn try_occupy(&self, id: HelperId, task_id: TaskId) -> DispatchResult<bool>;

    /// Clear occupancy only if it still points at `task_id`.
    async fn release(&self, id: HelperId, task_id: TaskId) -> DispatchResult<bool>;

    /// Clear occupancy for `task_id` and bump the completed-task count.
    async fn complete_occupancy(&self, id: HelperId, task_id: TaskId) -> DispatchResult<bool>;
}
