//! Axis-aligned bounding boxes over point sets.

use potholes_types::GeoPoint;
use serde::{Deserialize, Serialize};

use crate::error::GeoError;

/// Latitude/longitude extent of a point set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Southernmost latitude.
    pub min_lat: f64,
    /// Northernmost latitude.
    pub max_lat: f64,
    /// Westernmost longitude.
    pub min_lon: f64,
    /// Easternmost longitude.
    pub max_lon: f64,
}

impl Bounds {
    /// Midpoint of the box.
    ///
    /// Plain arithmetic mean, so a box spanning the antimeridian centers on
    /// the wrong side of the globe.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Latitude span in degrees.
    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Longitude span in degrees.
    pub fn lon_span(&self) -> f64 {
        self.max_lon - self.min_lon
    }
}

/// Smallest box containing every point.
///
/// # Errors
///
/// Returns [`GeoError::EmptyInput`] when `points` is empty.
pub fn compute_bounds(points: &[GeoPoint]) -> Result<Bounds, GeoError> {
    let (first, rest) = points.split_first().ok_or(GeoError::EmptyInput)?;

    let seed = Bounds {
        min_lat: first.lat,
        max_lat: first.lat,
        min_lon: first.lon,
        max_lon: first.lon,
    };

    Ok(rest.iter().fold(seed, |acc, p| Bounds {
        min_lat: acc.min_lat.min(p.lat),
        max_lat: acc.max_lat.max(p.lat),
        min_lon: acc.min_lon.min(p.lon),
        max_lon: acc.max_lon.max(p.lon),
    }))
}
