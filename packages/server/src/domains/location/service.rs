use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::models::{LocationInput, LocationUpdate, NearbyHelper, ProcessedLocation};
use crate::common::{Coordinate, DispatchResult, HelperId, TaskId};
use crate::config::DispatchConfig;
use crate::domains::spatial::SpatialIndex;
use crate::kernel::ttl_map::TtlMap;

#[derive(Debug, Clone)]
struct StoredSample {
    task_id: TaskId,
    coordinate: Coordinate,
    reported_at: chrono::DateTime<Utc>,
}

/// Ephemeral location state: per-helper rate limit, task destinations,
/// arrival cool-downs and the latest sample per helper.
pub struct LocationService {
    config: DispatchConfig,
    spatial: Arc<dyn SpatialIndex>,
    last_accepted: DashMap<HelperId, Instant>,
    destinations: DashMap<TaskId, Coordinate>,
    arrivals: TtlMap<TaskId, ()>,
    samples: TtlMap<HelperId, StoredSample>,
}

impl LocationService {
    pub fn new(config: DispatchConfig, spatial: Arc<dyn SpatialIndex>) -> Self {
        Self {
            arrivals: TtlMap::new(config.location_arrival_cooldown),
            samples: TtlMap::new(config.location_sample_ttl),
            last_accepted: DashMap::new(),
            destinations: DashMap::new(),
            spatial,
            config,
        }
    }

    /// Per-helper floor between accepted samples. Returns the remaining wait
    /// in milliseconds when the sample arrives too early.
    pub fn admit(&self, helper_id: HelperId, now: Instant) -> Result<(), u64> {
        let min_interval = self.config.location_min_interval;
        match self.last_accepted.entry(helper_id) {
            Entry::Occupied(mut slot) => {
                let elapsed = now.saturating_duration_since(*slot.get());
                if elapsed < min_interval {
                    let wait = (min_interval - elapsed).as_millis() as u64;
                    return Err(wait.max(1));
                }
                slot.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        Ok(())
    }

    /// Undo an admission whose sample was never broadcast, unless a later
    /// sample has been admitted since.
    pub fn release_admission(&self, helper_id: HelperId, admitted_at: Instant) {
        self.last_accepted
            .remove_if(&helper_id, |_, at| *at == admitted_at);
    }

    pub fn register_destination(&self, task_id: TaskId, destination: Coordinate) {
        self.destinations.insert(task_id, destination);
    }

    pub fn clear_destination(&self, task_id: TaskId) {
        self.destinations.remove(&task_id);
        self.arrivals.remove(&task_id);
    }

    pub fn destination(&self, task_id: TaskId) -> Option<Coordinate> {
        self.destinations.get(&task_id).map(|d| *d)
    }

    /// Apply obfuscation and arrival policy to an already-admitted sample and
    /// cache it.
    pub fn process(
        &self,
        helper_id: HelperId,
        task_id: TaskId,
        input: &LocationInput,
        now: Instant,
    ) -> DispatchResult<ProcessedLocation> {
        input.validate()?;
        let exact = input.coordinate();
        let timestamp = input.timestamp.unwrap_or_else(Utc::now);

        let distance = self
            .destination(task_id)
            .map(|destination| exact.distance_km(&destination));

        let obfuscated = distance
            .map(|d| d > self.config.location_exact_threshold_km)
            .unwrap_or(false);

        let update = if obfuscated {
            let resolution = self.config.obfuscation_resolution;
            let center = self
                .spatial
                .cell_center(self.spatial.cell_for(exact, resolution));
            LocationUpdate {
                helper_id,
                task_id,
                latitude: center.latitude,
                longitude: center.longitude,
                accuracy_m: Some((self.spatial.edge_length_km(resolution) * 1000.0).round()),
                heading: None,
                speed_kmh: None,
                timestamp,
                obfuscated: true,
                // Coarse enough not to pin the helper down on a known destination
                distance_to_destination_km: distance.map(|d| (d * 10.0).round() / 10.0),
            }
        } else {
            LocationUpdate {
                helper_id,
                task_id,
                latitude: exact.latitude,
                longitude: exact.longitude,
                accuracy_m: input.accuracy_m,
                heading: input.heading,
                speed_kmh: input.speed_kmh,
                timestamp,
                obfuscated: false,
                distance_to_destination_km: distance,
            }
        };

        let arriving = distance
            .map(|d| d <= self.config.location_arrival_threshold_km)
            .unwrap_or(false)
            && self.arrivals.insert_if_vacant(task_id, (), now);

        self.samples.insert_at(
            helper_id,
            StoredSample {
                task_id,
                coordinate: exact,
                reported_at: timestamp,
            },
            now,
        );

        Ok(ProcessedLocation {
            update,
            exact,
            arriving,
        })
    }

    /// Helpers whose latest fresh sample lies within `radius_km`, nearest first.
    pub fn helpers_within(&self, center: Coordinate, radius_km: f64, now: Instant) -> Vec<NearbyHelper> {
        let mut nearby: Vec<NearbyHelper> = self
            .samples
            .fresh_values(now)
            .into_iter()
            .filter_map(|(helper_id, sample)| {
                let distance_km = center.distance_km(&sample.coordinate);
                (distance_km <= radius_km).then_some(NearbyHelper {
                    helper_id,
                    task_id: sample.task_id,
                    distance_km,
                    reported_at: sample.reported_at,
                })
            })
            .collect();
        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        nearby
    }

    /// Drop expired samples, cool-downs and idle rate-limit slots.
    pub fn purge(&self, now: Instant) -> usize {
        let ttl = self.config.location_sample_ttl;
        let before = self.last_accepted.len();
        self.last_accepted
            .retain(|_, last| now.saturating_duration_since(*last) < ttl);
        let purged = self.samples.purge_expired(now)
            + self.arrivals.purge_expired(now)
            + (before - self.last_accepted.len());
        if purged > 0 {
            debug!(purged, "Purged expired location state");
        }
        purged
    }
}
