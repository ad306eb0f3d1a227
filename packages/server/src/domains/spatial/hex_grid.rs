use super::{CellId, SpatialIndex};
use crate::common::utils::geo::EARTH_RADIUS_KM;
use crate::common::Coordinate;

/// Edge length of a resolution-0 cell. Each finer resolution divides the
/// cell area by seven.
const RES0_EDGE_KM: f64 = 1107.712591;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Pointy-top hexagonal grid laid over a sinusoidal (equal-area) projection.
///
/// Cells have equal area at every latitude; shapes shear away from the
/// prime meridian, which does not affect ring adjacency. The grid does not
/// wrap across the antimeridian.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexGrid;

impl HexGrid {
    pub fn new() -> Self {
        Self
    }

    fn project(coordinate: Coordinate) -> (f64, f64) {
        let phi = coordinate.latitude.to_radians();
        let lambda = coordinate.longitude.to_radians();
        (EARTH_RADIUS_KM * lambda * phi.cos(), EARTH_RADIUS_KM * phi)
    }

    fn unproject(x: f64, y: f64) -> Coordinate {
        let phi = (y / EARTH_RADIUS_KM).clamp(-std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2);
        let cos_phi = phi.cos().max(1e-12);
        let lambda = (x / (EARTH_RADIUS_KM * cos_phi)).clamp(-std::f64::consts::PI, std::f64::consts::PI);
        Coordinate::new(phi.to_degrees(), lambda.to_degrees())
    }

    /// Round fractional axial coordinates to the containing hexagon.
    fn axial_round(q: f64, r: f64) -> (i64, i64) {
        let s = -q - r;
        let mut rq = q.round();
        let mut rr = r.round();
        let rs = s.round();

        let dq = (rq - q).abs();
        let dr = (rr - r).abs();
        let ds = (rs - s).abs();

        if dq > dr && dq > ds {
            rq = -rr - rs;
        } else if dr > ds {
            rr = -rq - rs;
        }

        (rq as i64, rr as i64)
    }
}

impl SpatialIndex for HexGrid {
    fn cell_for(&self, coordinate: Coordinate, resolution: u8) -> CellId {
        let resolution = resolution.min(15);
        let size = self.edge_length_km(resolution);
        let (x, y) = Self::project(coordinate);

        let q = (SQRT_3 / 3.0 * x - y / 3.0) / size;
        let r = (2.0 / 3.0 * y) / size;
        let (q, r) = Self::axial_round(q, r);

        CellId::pack(resolution, q, r)
    }

    fn cell_center(&self, cell: CellId) -> Coordinate {
        let size = self.edge_length_km(cell.resolution());
        let (q, r) = cell.axial();
        let (q, r) = (q as f64, r as f64);

        let x = size * SQRT_3 * (q + r / 2.0);
        let y = size * 1.5 * r;
        Self::unproject(x, y)
    }

    fn grid_disk(&self, cell: CellId, k: u32) -> Vec<CellId> {
        let k = k as i64;
        let resolution = cell.resolution();
        let (q, r) = cell.axial();

        let mut cells = Vec::with_capacity((3 * k * (k + 1) + 1) as usize);
        for dq in -k..=k {
            let lo = (-k).max(-dq - k);
            let hi = k.min(-dq + k);
            for dr in lo..=hi {
                cells.push(CellId::pack(resolution, q + dq, r + dr));
            }
        }

        cells.sort_by_key(|c| self.grid_distance(cell, *c).unwrap_or(u32::MAX));
        cells
    }

    fn grid_distance(&self, a: CellId, b: CellId) -> Option<u32> {
        if a.resolution() != b.resolution() {
            return None;
        }
        let (aq, ar) = a.axial();
        let (bq, br) = b.axial();
        let dq = aq - bq;
        let dr = ar - br;
        Some(((dq.abs() + dr.abs() + (dq + dr).abs()) / 2) as u32)
    }

    fn edge_length_km(&self, resolution: u8) -> f64 {
        RES0_EDGE_KM / 7f64.powf(resolution as f64 / 2.0)
    }
}
