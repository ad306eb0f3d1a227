use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

use super::HelperStore;
use crate::common::{Coordinate, DispatchError, DispatchResult, HelperId, TaskId};
use crate::domains::helpers::models::helper::HelperAvailability;
use crate::domains::spatial::CellId;

/// Helper store backed by a concurrent map.
///
/// Each mutation runs under the entry's shard lock, which gives the same
/// per-row atomicity as the conditional `UPDATE`s in Postgres.
#[derive(Default)]
pub struct InMemoryHelperStore {
    helpers: DashMap<HelperId, HelperAvailability>,
}

impl InMemoryHelperStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, id: HelperId, f: F) -> bool
    where
        F: FnOnce(&mut HelperAvailability) -> bool,
    {
        match self.helpers.get_mut(&id) {
            Some(mut helper) => {
                let changed = f(&mut helper);
                if changed {
                    helper.updated_at = Utc::now();
                }
                changed
            }
            None => false,
        }
    }
}

#[async_trait]
impl HelperStore for InMemoryHelperStore {
    async fn insert(&self, helper: &HelperAvailability) -> DispatchResult<()> {
        if self.helpers.contains_key(&helper.id) {
            return Err(DispatchError::Conflict(format!(
                "helper {} already exists",
                helper.id
            )));
        }
        self.helpers.insert(helper.id, helper.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: HelperId) -> DispatchResult<Option<HelperAvailability>> {
        Ok(self.helpers.get(&id).map(|h| h.clone()))
    }

    async fn find_available_in_cells(
        &self,
        cells: &[CellId],
    ) -> DispatchResult<Vec<HelperAvailability>> {
        let wanted: HashSet<CellId> = cells.iter().copied().collect();
        Ok(self
            .helpers
            .iter()
            .filter(|h| h.is_dispatchable())
            .filter(|h| h.cell_id.map(|c| wanted.contains(&c)).unwrap_or(false))
            .map(|h| h.clone())
            .collect())
    }

    async fn set_online(&self, id: HelperId, online: bool, at: DateTime<Utc>) -> DispatchResult<bool> {
        Ok(self.update(id, |h| {
            if h.presence_changed_at.map(|prev| prev > at).unwrap_or(false) {
                return false;
            }
            h.is_online = online;
            h.presence_changed_at = Some(at);
            if online {
                h.last_heartbeat_at = Some(at);
            }
            true
        }))
    }

    async fn record_heartbeat(&self, id: HelperId, at: DateTime<Utc>) -> DispatchResult<bool> {
        Ok(self.update(id, |h| {
            h.last_heartbeat_at = Some(at);
            true
        }))
    }

    async fn update_position(
        &self,
        id: HelperId,
        position: Coordinate,
        cell: CellId,
        at: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        Ok(self.update(id, |h| {
            if h.position_updated_at.map(|prev| prev > at).unwrap_or(false) {
                return false;
            }
            h.latitude = Some(position.latitude);
            h.longitude = Some(position.longitude);
            h.cell_id = Some(cell);
            h.position_updated_at = Some(at);
            true
        }))
    }

    async fn try_occupy(&self, id: HelperId, task_id: TaskId) -> DispatchResult<bool> {
        Ok(self.update(id, |h| {
            if h.current_task_id.is_some() {
                return false;
            }
            h.current_task_id = Some(task_id);
            true
        }))
    }

    async fn release(&self, id: HelperId, task_id: TaskId) -> DispatchResult<bool> {
        Ok(self.update(id, |h| {
            if h.current_task_id != Some(task_id) {
                return false;
            }
            h.current_task_id = None;
            true
        }))
    }

    async fn complete_occupancy(&self, id: HelperId, task_id: TaskId) -> DispatchResult<bool> {
        Ok(self.update(id, |h| {
            if h.current_task_id != Some(task_id) {
                return false;
            }
            h.current_task_id = None;
            h.completed_task_count += 1;
            true
        }))
    }
}
