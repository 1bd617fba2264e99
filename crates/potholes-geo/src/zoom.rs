//! Web Mercator projection and adaptive camera zoom.
//!
//! The zoom heuristic frames a session's points inside a viewport, then nudges
//! the result by point density: a handful of pins gets a close-up, a dense
//! cloud gets surrounding context. The breakpoints and offsets are tuned
//! constants; changing them changes every rendered share image.

use core::f64::consts::{FRAC_PI_4, TAU};

use potholes_types::GeoPoint;

use crate::bounds::compute_bounds;

/// Latitude limit of the Web Mercator projection, in degrees.
pub const MERCATOR_LAT_LIMIT: f64 = 85.0;

/// Zoom used for a single point (or none).
pub const SINGLE_POINT_ZOOM: f64 = 16.5;

/// Lowest zoom ever returned.
pub const MIN_ZOOM: f64 = 9.0;

/// Highest zoom ever returned.
pub const MAX_ZOOM: f64 = 17.0;

/// Padding applied to the bounding box before fitting (25%).
const PADDING_FACTOR: f64 = 1.25;

/// Tile basis of the static map renderer.
const TILE_SIZE: f64 = 512.0;

/// Smallest world fraction a box may occupy, so identical points stay finite.
const MIN_WORLD_FRACTION: f64 = 0.000_01;

/// Bonus for sessions of at most [`FEW_POINTS`] points.
const FEW_POINTS_BONUS: f64 = 0.8;
const FEW_POINTS: usize = 3;

/// Pull-back for sessions of at least [`DENSE_POINTS`] points.
const DENSE_PULLBACK: f64 = 1.2;
const DENSE_POINTS: usize = 20;
const DENSE_FLOOR: f64 = 9.0;

/// Pull-back for sessions of [`BUSY_POINTS`] to `DENSE_POINTS - 1` points.
const BUSY_PULLBACK: f64 = 0.6;
const BUSY_POINTS: usize = 10;
const BUSY_FLOOR: f64 = 9.5;

/// Projected Web Mercator `y` for a latitude in degrees.
///
/// Latitude is clamped to `[-85, 85]` first, so the poles map to finite
/// values instead of infinity.
pub fn mercator_y(lat: f64) -> f64 {
    let rad = lat
        .clamp(-MERCATOR_LAT_LIMIT, MERCATOR_LAT_LIMIT)
        .to_radians();
    (FRAC_PI_4 + rad / 2.0).tan().ln()
}

/// Pick a camera zoom that frames `points` inside a viewport of the given
/// pixel size.
///
/// Always within [`MIN_ZOOM`]..=[`MAX_ZOOM`]. Zero or one point yields
/// exactly [`SINGLE_POINT_ZOOM`]. Points sharing one spot (a zero-extent box)
/// are fitted as a lone pin before the density adjustment is applied.
pub fn adaptive_zoom(points: &[GeoPoint], viewport_width: u32, viewport_height: u32) -> f64 {
    if points.len() <= 1 {
        return SINGLE_POINT_ZOOM;
    }
    let Ok(bounds) = compute_bounds(points) else {
        return SINGLE_POINT_ZOOM;
    };

    let lat_span = (mercator_y(bounds.max_lat) - mercator_y(bounds.min_lat)) / TAU;
    let lon_span = bounds.lon_span();

    let fitted = if lat_span < MIN_WORLD_FRACTION && lon_span < MIN_WORLD_FRACTION {
        SINGLE_POINT_ZOOM
    } else {
        let lat_fraction = lat_span.max(MIN_WORLD_FRACTION) * PADDING_FACTOR;
        let lon_fraction = lon_span.max(MIN_WORLD_FRACTION) / 360.0 * PADDING_FACTOR;
        let lat_zoom = (f64::from(viewport_height) / TILE_SIZE / lat_fraction).log2();
        let lon_zoom = (f64::from(viewport_width) / TILE_SIZE / lon_fraction).log2();
        lat_zoom.min(lon_zoom)
    };

    let count = points.len();
    let adjusted = if count <= FEW_POINTS {
        (fitted + FEW_POINTS_BONUS).min(MAX_ZOOM)
    } else if count >= DENSE_POINTS {
        (fitted - DENSE_PULLBACK).max(DENSE_FLOOR)
    } else if count >= BUSY_POINTS {
        (fitted - BUSY_PULLBACK).max(BUSY_FLOOR)
    } else {
        fitted
    };

    if adjusted.is_nan() {
        return MIN_ZOOM;
    }
    adjusted.clamp(MIN_ZOOM, MAX_ZOOM)
}
