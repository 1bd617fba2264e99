//! Geometry helpers for the Potholes Live report store and share images.
//!
//! Everything here is a pure function of its inputs: great-circle distance
//! for deduplication, bounding boxes and Mercator-aware zoom selection for
//! framing a session on a static map.
//!
//! # Modules
//!
//! - [`distance`] -- Haversine distance and path length
//! - [`bounds`] -- Bounding boxes over point sets
//! - [`zoom`] -- Web Mercator projection and adaptive zoom
//! - [`error`] -- Shared error types

pub mod bounds;
pub mod distance;
pub mod error;
pub mod zoom;

pub use bounds::{Bounds, compute_bounds};
pub use distance::{EARTH_RADIUS_M, haversine_meters, path_length_meters};
pub use error::GeoError;
pub use zoom::{MAX_ZOOM, MIN_ZOOM, SINGLE_POINT_ZOOM, adaptive_zoom, mercator_y};
