pub mod geo;

pub use geo::{calculate_distance_km, estimate_eta_minutes, Coordinate};
