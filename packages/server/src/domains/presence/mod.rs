//! Presence - live online/offline and activity status per user.
//!
//! Online state is reference-counted by live sessions: a user goes offline
//! only when their last session ends or when the sweep finds them silent
//! past the offline timeout with no session left.

pub mod actions;
pub mod models;
pub mod service;

pub use models::{ActivityStatus, Connection, DeviceInfo, PresenceChange, PresenceSnapshot, PresenceStatus};
pub use service::PresenceService;
