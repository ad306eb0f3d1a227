//! Helper domain - dispatch-relevant availability of service providers.
//!
//! The durable profile (verification, rating, skills) is owned upstream; this
//! core mutates only narrow fields: online flag, heartbeat, position and
//! occupancy. Every write is a field-level conditional update so the
//! heartbeat, claim and completion paths never clobber each other.

pub mod actions;
pub mod models;
pub mod store;

pub use models::helper::{HelperAvailability, VerificationStatus};
pub use store::{HelperStore, InMemoryHelperStore, PostgresHelperStore};
