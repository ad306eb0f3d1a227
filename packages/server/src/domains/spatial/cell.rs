use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const COORD_BITS: u32 = 29;
const COORD_MASK: u64 = (1 << COORD_BITS) - 1;
const COORD_OFFSET: i64 = 1 << (COORD_BITS - 1);
const RESOLUTION_SHIFT: u32 = COORD_BITS * 2;

/// Identifier of one hexagonal cell.
///
/// Layout (62 bits used, always non-negative as `i64`):
/// `resolution:4 | q:29 | r:29`, where `(q, r)` are offset axial coordinates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct CellId(i64);

impl CellId {
    pub(super) fn pack(resolution: u8, q: i64, r: i64) -> Self {
        let q = ((q + COORD_OFFSET) as u64) & COORD_MASK;
        let r = ((r + COORD_OFFSET) as u64) & COORD_MASK;
        let packed = ((resolution as u64 & 0xF) << RESOLUTION_SHIFT) | (q << COORD_BITS) | r;
        CellId(packed as i64)
    }

    pub(super) fn axial(&self) -> (i64, i64) {
        let raw = self.0 as u64;
        let q = ((raw >> COORD_BITS) & COORD_MASK) as i64 - COORD_OFFSET;
        let r = (raw & COORD_MASK) as i64 - COORD_OFFSET;
        (q, r)
    }

    pub fn resolution(&self) -> u8 {
        ((self.0 as u64 >> RESOLUTION_SHIFT) & 0xF) as u8
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn from_i64(raw: i64) -> Self {
        CellId(raw)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for CellId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        i64::from_str_radix(s, 16).map(CellId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_keeps_resolution_and_axial() {
        for (res, q, r) in [(0u8, 0i64, 0i64), (8, -1234, 98765), (15, 21_000_000, -21_000_000)] {
            let cell = CellId::pack(res, q, r);
            assert_eq!(cell.resolution(), res);
            assert_eq!(cell.axial(), (q, r));
            assert!(cell.as_i64() >= 0);
        }
    }

    #[test]
    fn test_display_parses_back() {
        let cell = CellId::pack(9, 42, -7);
        let parsed: CellId = cell.to_string().parse().unwrap();
        assert_eq!(parsed, cell);
    }
}
