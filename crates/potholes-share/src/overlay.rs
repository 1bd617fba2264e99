//! Static-map camera and overlay strings.
//!
//! Overlays use the static map API's inline syntax: a `path-...` polyline
//! for the trip, followed by one `url-...` marker per point so pins sit on
//! top of the path. Coordinates are `lon,lat` with six decimals.

use std::fmt::Write as _;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use potholes_geo::{adaptive_zoom, compute_bounds};
use potholes_types::GeoPoint;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Pin image used when none is configured.
pub const FALLBACK_PIN_URL: &str = "https://potholes.live/icon-192.png";

/// Path stroke: width 5, color `#2196F3`, opacity 0.8.
const PATH_STYLE: &str = "path-5+2196F3-0.8";

/// Characters left unescaped by `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Where the static map is centered and how far it is zoomed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Camera {
    /// Center longitude in degrees.
    pub lon: f64,
    /// Center latitude in degrees.
    pub lat: f64,
    /// Web Mercator zoom level.
    pub zoom: f64,
}

impl Camera {
    /// Camera used when a session has no points (Bengaluru).
    pub const FALLBACK: Self = Self {
        lon: 77.5946,
        lat: 12.9716,
        zoom: 10.0,
    };

    /// Frame `points` in a map region of `width` x `height` pixels.
    ///
    /// Empty input yields [`Camera::FALLBACK`].
    pub fn framing(points: &[GeoPoint], width: u32, height: u32) -> Self {
        compute_bounds(points).map_or(Self::FALLBACK, |bounds| {
            let center = bounds.center();
            Self {
                lon: center.lon,
                lat: center.lat,
                zoom: adaptive_zoom(points, width, height),
            }
        })
    }

    /// The `lon,lat,zoom` form used in static map URLs.
    pub fn to_param(&self) -> String {
        format!("{:.6},{:.6},{:.2}", self.lon, self.lat, self.zoom)
    }
}

/// Resolve the pin image URL: the configured one, else the public icon.
pub fn resolve_pin_url(configured: Option<&str>) -> String {
    configured
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or(FALLBACK_PIN_URL)
        .to_owned()
}

fn push_coord(out: &mut String, point: GeoPoint) {
    // Writing to a String cannot fail.
    let _ = write!(out, "{:.6},{:.6}", point.lon, point.lat);
}

/// Polyline overlay through `points` in order; `None` below two points.
pub fn path_overlay(points: &[GeoPoint]) -> Option<String> {
    if points.len() < 2 {
        return None;
    }
    let mut out = String::from(PATH_STYLE);
    out.push('(');
    for (i, point) in points.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_coord(&mut out, *point);
    }
    out.push(')');
    Some(out)
}

/// One custom-marker overlay per point; `None` for no points.
pub fn pin_overlay(points: &[GeoPoint], pin_url: &str) -> Option<String> {
    if points.is_empty() {
        return None;
    }
    let icon = utf8_percent_encode(pin_url, URI_COMPONENT).to_string();
    let pins: Vec<String> = points
        .iter()
        .map(|point| {
            let mut pin = format!("url-{icon}(");
            push_coord(&mut pin, *point);
            pin.push(')');
            pin
        })
        .collect();
    Some(pins.join(","))
}

/// Full overlay list: path first, pins on top. Empty when there are no points.
pub fn overlay_spec(points: &[GeoPoint], pin_url: &str) -> String {
    [path_overlay(points), pin_overlay(points, pin_url)]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use potholes_geo::SINGLE_POINT_ZOOM;

    use super::*;

    const PIN: &str = "https://potholes.live/icon-192.png";

    #[test]
    fn path_needs_two_points() {
        assert!(path_overlay(&[]).is_none());
        assert!(path_overlay(&[GeoPoint::new(1.0, 2.0)]).is_none());

        let path = path_overlay(&[GeoPoint::new(12.5, 77.25), GeoPoint::new(12.75, 77.5)]);
        assert_eq!(
            path.as_deref(),
            Some("path-5+2196F3-0.8(77.250000,12.500000,77.500000,12.750000)")
        );
    }

    #[test]
    fn pin_url_is_uri_component_encoded() {
        let pins = pin_overlay(&[GeoPoint::new(1.0, 2.0)], PIN);
        assert_eq!(
            pins.as_deref(),
            Some("url-https%3A%2F%2Fpotholes.live%2Ficon-192.png(2.000000,1.000000)")
        );
    }

    #[test]
    fn overlay_puts_path_before_pins() {
        let points = [GeoPoint::new(1.0, 2.0), GeoPoint::new(3.0, 4.0)];
        let spec = overlay_spec(&points, PIN);
        assert!(spec.starts_with("path-5+2196F3-0.8("));
        assert_eq!(spec.matches("url-").count(), 2);
        assert!(!spec.ends_with(','));

        let single = overlay_spec(&points[..1], PIN);
        assert!(single.starts_with("url-"));
        assert_eq!(overlay_spec(&[], PIN), "");
    }

    #[test]
    fn empty_session_uses_fallback_camera() {
        assert_eq!(Camera::framing(&[], 1080, 1056), Camera::FALLBACK);
    }

    #[test]
    fn single_point_is_centered_at_fixed_zoom() {
        let camera = Camera::framing(&[GeoPoint::new(48.8566, 2.3522)], 1080, 1056);
        assert!((camera.lat - 48.8566).abs() < 1e-12);
        assert!((camera.zoom - SINGLE_POINT_ZOOM).abs() < f64::EPSILON);
        assert_eq!(camera.to_param(), "2.352200,48.856600,16.50");
    }

    #[test]
    fn pin_url_resolution_falls_back() {
        assert_eq!(resolve_pin_url(None), FALLBACK_PIN_URL);
        assert_eq!(resolve_pin_url(Some("  ")), FALLBACK_PIN_URL);
        assert_eq!(
            resolve_pin_url(Some("https://cdn.example/pin.png")),
            "https://cdn.example/pin.png"
        );
    }
}
