//! Event fan-out - typed events delivered live to rooms and durably through
//! the broker, consumed through a single dispatch table.

pub mod consumer;
pub mod events;
pub mod handlers;
pub mod publisher;
pub mod stats;

pub use consumer::{run_consumers, ConsumerTable, EventHandler};
pub use events::{DispatchEvent, EventPriority, EventType};
pub use publisher::EventPublisher;
pub use stats::{ConsumerStats, QueueStats};
