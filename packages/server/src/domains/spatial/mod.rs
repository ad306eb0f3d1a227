//! Spatial index adapter - hexagonal cells for O(1) proximity bucketing.
//!
//! Tasks and helpers are bucketed into cells at a fixed resolution; matching
//! walks concentric rings of cells (`grid_disk`) around the task's cell.

mod cell;
mod hex_grid;

pub use cell::CellId;
pub use hex_grid::HexGrid;

use crate::common::Coordinate;

/// Behavioural contract the matching engine and location obfuscation rely on.
pub trait SpatialIndex: Send + Sync {
    /// Cell containing `coordinate` at `resolution` (0 = coarsest, 15 = finest).
    fn cell_for(&self, coordinate: Coordinate, resolution: u8) -> CellId;

    /// Geographic center of a cell.
    fn cell_center(&self, cell: CellId) -> Coordinate;

    /// Every cell within `k` steps of `cell`, nearest rings first.
    /// `k = 0` yields only `cell`.
    fn grid_disk(&self, cell: CellId, k: u32) -> Vec<CellId>;

    /// Step distance between two cells of the same resolution.
    fn grid_distance(&self, a: CellId, b: CellId) -> Option<u32>;

    /// Approximate hexagon edge length at `resolution`.
    fn edge_length_km(&self, resolution: u8) -> f64;
}
