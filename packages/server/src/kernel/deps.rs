//! Server dependencies for actions (using traits for testability)
//!
//! This module provides the central dependency container passed by reference
//! to every action, consumer and background loop. Stores and external
//! collaborators sit behind traits so tests can swap in in-memory versions.

use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::domains::fanout::{ConsumerStats, EventPublisher};
use crate::domains::helpers::HelperStore;
use crate::domains::location::LocationService;
use crate::domains::presence::PresenceService;
use crate::domains::spatial::SpatialIndex;
use crate::domains::tasks::TaskStore;
use crate::kernel::broker::BaseBroker;
use crate::kernel::dispatch_pool::{DispatchPool, DispatchWorkers};
use crate::kernel::stream_hub::StreamHub;
use crate::kernel::{BaseLedgerService, BasePushNotificationService, BaseSkillCatalog};

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to actions (using traits for testability)
#[derive(Clone)]
pub struct ServerDeps {
    pub tasks: Arc<dyn TaskStore>,
    pub helpers: Arc<dyn HelperStore>,
    pub skills: Arc<dyn BaseSkillCatalog>,
    pub spatial: Arc<dyn SpatialIndex>,
    pub broker: Arc<dyn BaseBroker>,
    pub push_service: Arc<dyn BasePushNotificationService>,
    pub ledger: Arc<dyn BaseLedgerService>,
    /// In-process rooms for live delivery to WebSocket sessions
    pub stream_hub: StreamHub,
    pub presence: Arc<PresenceService>,
    pub location: Arc<LocationService>,
    pub publisher: EventPublisher,
    /// Producer half of the matching worker pool
    pub dispatch_pool: DispatchPool,
    pub consumer_stats: Arc<ConsumerStats>,
    pub config: Arc<DispatchConfig>,
}

/// Stores and collaborators that vary between production and tests.
pub struct Collaborators {
    pub tasks: Arc<dyn TaskStore>,
    pub helpers: Arc<dyn HelperStore>,
    pub skills: Arc<dyn BaseSkillCatalog>,
    pub spatial: Arc<dyn SpatialIndex>,
    pub broker: Arc<dyn BaseBroker>,
    pub push_service: Arc<dyn BasePushNotificationService>,
    pub ledger: Arc<dyn BaseLedgerService>,
}

impl ServerDeps {
    /// Wire the in-process services around `collaborators`.
    ///
    /// Returns the worker half of the dispatch pool; the caller starts it
    /// with a `MatchAndDispatch` job built from these deps.
    pub fn new(collaborators: Collaborators, config: DispatchConfig) -> (Self, DispatchWorkers) {
        let Collaborators {
            tasks,
            helpers,
            skills,
            spatial,
            broker,
            push_service,
            ledger,
        } = collaborators;

        let stream_hub = StreamHub::new();
        let publisher = EventPublisher::new(stream_hub.clone(), broker.clone());
        let presence = Arc::new(PresenceService::new(config.presence_offline_timeout));
        let location = Arc::new(LocationService::new(config.clone(), spatial.clone()));
        let (dispatch_pool, workers) =
            DispatchPool::new(config.dispatch_queue_capacity, config.dispatch_workers);

        let deps = Self {
            tasks,
            helpers,
            skills,
            spatial,
            broker,
            push_service,
            ledger,
            stream_hub,
            presence,
            location,
            publisher,
            dispatch_pool,
            consumer_stats: Arc::new(ConsumerStats::new()),
            config: Arc::new(config),
        };
        (deps, workers)
    }
}
