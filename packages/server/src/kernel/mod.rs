//! Kernel module - server infrastructure and dependencies.

pub mod broker;
pub mod collaborators;
pub mod deps;
pub mod dispatch_pool;
pub mod scheduled_tasks;
pub mod stream_hub;
pub mod test_dependencies;
pub mod traits;
pub mod ttl_map;

pub use broker::{BaseBroker, InMemoryBroker, JetStreamBroker};
pub use collaborators::{
    LoggingLedgerService, LoggingPushService, PostgresSkillCatalog, StaticSkillCatalog,
};
pub use deps::{Collaborators, ServerDeps};
pub use dispatch_pool::{DispatchJob, DispatchPool, DispatchWorkers};
pub use stream_hub::{Room, StreamHub};
pub use test_dependencies::TestDependencies;
pub use traits::*;
pub use ttl_map::TtlMap;
