//! Grid generation over a bounding square and chunk selection for
//! parallel batch instances.

use serde::{Deserialize, Serialize};

/// Meters per degree of latitude (WGS84 mean)
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// One node of the search lattice, used as a cell center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Generate the ordered lattice of grid points covering the square of
/// side `span_km` centered on `center`.
///
/// Points are spaced `spacing_m` apart on both axes, with the longitude
/// step widened by 1/cos(lat) so physical spacing stays uniform. The
/// lattice is inset by one spacing from the square's edge: each grid
/// point is queried with a radius of at least the spacing, so the cells
/// reach the edge while their centers stay inside.
///
/// Deterministic; valid numeric input always yields at least the center
/// point itself. Centers are expected within 85 degrees of latitude.
pub fn generate_grid(center: GridPoint, span_km: f64, spacing_m: f64) -> Vec<GridPoint> {
    // Planar degree math; cos(lat) -> 0 at the poles breaks the
    // longitude step
    debug_assert!(
        center.lat.abs() <= 85.0,
        "grid generation is undefined above 85 degrees of latitude"
    );

    let half_extent_m = (span_km * 1000.0 / 2.0 - spacing_m).max(0.0);

    let lat_step = spacing_m / METERS_PER_DEGREE;
    let lng_scale = METERS_PER_DEGREE * center.lat.to_radians().cos();
    let lng_step = spacing_m / lng_scale;

    let half_lat = half_extent_m / METERS_PER_DEGREE;
    let half_lng = half_extent_m / lng_scale;

    // Guard against float drift excluding the last row/column
    let lat_eps = lat_step * 1e-6;
    let lng_eps = lng_step * 1e-6;

    let mut points = Vec::new();
    let mut lat = center.lat - half_lat;
    while lat <= center.lat + half_lat + lat_eps {
        let mut lng = center.lng - half_lng;
        while lng <= center.lng + half_lng + lng_eps {
            points.push(GridPoint { lat, lng });
            lng += lng_step;
        }
        lat += lat_step;
    }

    points
}

/// Select the contiguous slice of `points` belonging to chunk
/// `chunk_index` out of `chunk_count` near-equal chunks.
///
/// Every parallel instance recomputes the identical full grid and picks
/// its own slice, so no cross-instance coordination is needed. A chunk
/// count of 0 or 1 returns the full list.
pub fn select_chunk(points: &[GridPoint], chunk_count: usize, chunk_index: usize) -> &[GridPoint] {
    if chunk_count <= 1 {
        return points;
    }
    if chunk_index >= chunk_count {
        return &[];
    }

    let base = points.len() / chunk_count;
    let remainder = points.len() % chunk_count;

    // The first `remainder` chunks carry one extra point
    let start = chunk_index * base + chunk_index.min(remainder);
    let len = base + usize::from(chunk_index < remainder);

    &points[start..start + len]
}
