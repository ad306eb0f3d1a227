//! Geospatial matching - ring expansion over the hex index plus multi-factor ranking.

pub mod engine;
pub mod models;
pub mod utils;

pub use engine::{find_helpers, MatchRequest};
pub use models::candidate::MatchCandidate;
