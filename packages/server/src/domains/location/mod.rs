//! Location domain - rate-limited ingestion of helper positions, privacy
//! obfuscation, arrival detection and a short-lived sample cache.

pub mod actions;
pub mod models;
pub mod service;

pub use actions::ingest_location;
pub use models::{IngestOutcome, LocationInput, LocationUpdate, NearbyHelper, ProcessedLocation};
pub use service::LocationService;
