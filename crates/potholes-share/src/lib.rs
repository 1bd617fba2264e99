//! Share image compositor for Potholes Live.
//!
//! Turns a session's points into a shareable PNG: a dark gradient card with
//! a static map of the trip (path plus pins), the pothole count, an optional
//! place name and distance, and a call to action.
//!
//! # Modules
//!
//! - [`compositor`] -- `compose` and the pre-I/O plan
//! - [`layout`] -- Options, presets and the declarative draw list
//! - [`overlay`] -- Camera framing and static-map overlay strings
//! - [`tiles`] -- Static map fetch adapters
//! - [`geocode`] -- Reverse geocoding for subtitles
//! - [`raster`] -- Pixel rendering and PNG encoding
//! - [`error`] -- Error types

pub mod compositor;
pub mod error;
pub mod geocode;
pub mod layout;
pub mod overlay;
pub mod raster;
pub mod tiles;

pub use compositor::{ComposeOutcome, CompositorSettings, ShareCompositor, ShareImage, SharePlan};
pub use error::ShareError;
pub use geocode::{GeocoderBackend, HttpGeocoder, ReverseGeocoder};
pub use layout::{
    DrawOp, ShareOptions, TripStats, coordinate_label, plan_layout, report_caption, share_caption,
};
pub use overlay::{Camera, FALLBACK_PIN_URL, resolve_pin_url};
pub use raster::{FontSet, Rasterizer};
pub use tiles::{BlankTileFetcher, DEFAULT_STYLE, HttpTileFetcher, TileBackend, TileFetcher, TileRequest};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        use ts_rs::TS;

        let _ = crate::layout::ShareOptions::export_all();
        let _ = crate::layout::TripStats::export_all();
        let _ = crate::overlay::Camera::export_all();
    }
}
