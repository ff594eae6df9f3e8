//! Adaptive cell subdivision.
//!
//! A capped response means the endpoint may have truncated the result,
//! so the cell is split into four half-radius children to recover
//! coverage. Splitting is driven by an explicit work queue in the
//! orchestrator, never by recursion, which makes the depth bound a
//! plain field comparison.

use tracing::{debug, warn};

use crate::grid::{GridPoint, METERS_PER_DEGREE};

/// A circular search area queried in one Overpass call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    pub depth: u8,
}

impl Cell {
    pub fn from_grid_point(point: GridPoint, radius_m: f64) -> Self {
        Self {
            lat: point.lat,
            lng: point.lng,
            radius_m,
            depth: 0,
        }
    }

    /// Split into four half-radius children offset diagonally
    /// (NE/NW/SE/SW) by half the parent radius on each axis.
    ///
    /// This is a coverage approximation, not an exact partition of the
    /// parent circle: children overlap near the parent center and leave
    /// thin slivers at the diagonal edge. The run-scoped dedupe absorbs
    /// the overlap; the sliver loss is an accepted tradeoff.
    pub fn split(&self) -> [Cell; 4] {
        let half = self.radius_m / 2.0;
        let dlat = half / METERS_PER_DEGREE;
        let dlng = half / (METERS_PER_DEGREE * self.lat.to_radians().cos());

        let child = |lat_sign: f64, lng_sign: f64| Cell {
            lat: self.lat + lat_sign * dlat,
            lng: self.lng + lng_sign * dlng,
            radius_m: half,
            depth: self.depth + 1,
        };

        // NE, NW, SE, SW
        [
            child(1.0, 1.0),
            child(1.0, -1.0),
            child(-1.0, 1.0),
            child(-1.0, -1.0),
        ]
    }
}

/// Bounds on how far a saturated cell may be subdivided.
#[derive(Debug, Clone, Copy)]
pub struct SubdivisionPolicy {
    pub max_depth: u8,
    /// Children below this radius are never created, regardless of the
    /// remaining depth budget.
    pub min_radius_m: f64,
}

impl Default for SubdivisionPolicy {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_radius_m: 250.0,
        }
    }
}

impl SubdivisionPolicy {
    /// Decide what happens to a queried cell: `None` stops, `Some`
    /// yields the four children to enqueue.
    pub fn children(&self, cell: &Cell, capped: bool) -> Option<[Cell; 4]> {
        if !capped {
            return None;
        }

        let half = cell.radius_m / 2.0;
        if half < self.min_radius_m {
            debug!(
                lat = cell.lat,
                lng = cell.lng,
                radius_m = cell.radius_m,
                "capped cell at radius floor, not subdividing"
            );
            return None;
        }

        if cell.depth >= self.max_depth {
            warn!(
                lat = cell.lat,
                lng = cell.lng,
                radius_m = cell.radius_m,
                depth = cell.depth,
                "capped cell at max subdivision depth, coverage may be incomplete"
            );
            return None;
        }

        Some(cell.split())
    }
}
