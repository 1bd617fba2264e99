//! Share image layout as an ordered list of draw operations.
//!
//! Nothing here touches pixels. [`plan_layout`] turns a point count and
//! [`ShareOptions`] into [`DrawOp`]s that the rasterizer replays in order,
//! which keeps the layout inspectable in tests.
//!
//! Only the map region scales with the canvas height; text positions are
//! fixed offsets tuned for the 1080x1920 story format.

use potholes_types::{GeoPoint, Report};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ShareError;

/// Default canvas width (story format).
pub const DEFAULT_WIDTH: u32 = 1080;

/// Default canvas height (story format).
pub const DEFAULT_HEIGHT: u32 = 1920;

/// Largest accepted canvas edge.
pub const MAX_EDGE: u32 = 4096;

/// Title used when none is given.
pub const DEFAULT_TITLE: &str = "Potholes.live";

/// Map region top, as a fraction of canvas height.
const MAP_TOP_FRACTION: f64 = 0.25;

/// Map region height, as a fraction of canvas height.
const MAP_HEIGHT_FRACTION: f64 = 0.55;

/// An sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Build a color from a `0xRRGGBB` literal.
    pub const fn hex(value: u32) -> Self {
        let [_, r, g, b] = value.to_be_bytes();
        Self(r, g, b)
    }
}

const SLATE_900: Rgb = Rgb::hex(0x000f_172a);
const SLATE_800: Rgb = Rgb::hex(0x001e_293b);
const SLATE_400: Rgb = Rgb::hex(0x0094_a3b8);
const SLATE_500: Rgb = Rgb::hex(0x0064_748b);
const BRAND_GREEN: Rgb = Rgb::hex(0x008a_ff7a);
const ALERT_RED: Rgb = Rgb::hex(0x00ff_4444);
const WHITE: Rgb = Rgb::hex(0x00ff_ffff);

/// Background gradient stops, top to bottom.
pub const BACKGROUND_STOPS: [(f32, Rgb); 4] = [
    (0.0, SLATE_900),
    (0.3, SLATE_800),
    (0.7, SLATE_800),
    (1.0, SLATE_900),
];

/// Font weight for a text op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weight {
    /// Regular face.
    Regular,
    /// Bold face.
    Bold,
}

/// Pixel rectangle on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// One step of the composition, replayed in list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DrawOp {
    /// Vertical linear gradient over the whole canvas.
    FillGradient {
        /// `(offset, color)` stops with offsets in `[0, 1]`.
        stops: Vec<(f32, Rgb)>,
    },
    /// The fetched static map, scaled into `rect`.
    MapImage {
        /// Destination on the canvas.
        rect: Rect,
    },
    /// A line of text horizontally centered on `center_x`.
    Text {
        /// The text.
        text: String,
        /// Horizontal center in pixels.
        center_x: f32,
        /// Baseline in pixels from the top.
        baseline: f32,
        /// Font size in pixels.
        size: f32,
        /// Face to use.
        weight: Weight,
        /// Fill color.
        color: Rgb,
    },
}

/// Trip statistics shown under the map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TripStats {
    /// Distance traveled in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub distance_m: Option<f64>,
    /// Average speed in meters per second. Not drawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub speed_mps: Option<f64>,
}

/// Caller-tunable parts of a share image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export, export_to = "bindings/")]
pub struct ShareOptions {
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    /// Headline; [`DEFAULT_TITLE`] when absent.
    #[ts(optional)]
    pub title: Option<String>,
    /// Place name shown as `Location: ...`.
    #[ts(optional)]
    pub subtitle: Option<String>,
    /// Trip statistics.
    #[ts(optional)]
    pub stats: Option<TripStats>,
}

impl Default for ShareOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            title: None,
            subtitle: None,
            stats: None,
        }
    }
}

impl ShareOptions {
    /// Square card for re-sharing one report from a profile.
    ///
    /// The subtitle is the place name when known, else the coordinates with
    /// four decimals.
    pub fn single_report(report: &Report, place: Option<&str>) -> Self {
        let subtitle = place.map_or_else(|| coordinate_label(report.point()), ToOwned::to_owned);
        Self {
            width: 1200,
            height: 1200,
            title: Some(String::from("1 Pothole Mapped")),
            subtitle: Some(subtitle),
            stats: None,
        }
    }

    /// Reject zero-sized or oversized canvases.
    pub fn validate(&self) -> Result<(), ShareError> {
        for (edge, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value > MAX_EDGE {
                return Err(ShareError::InvalidCanvas(format!(
                    "{edge} must be in 1..={MAX_EDGE}, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Where the map goes on this canvas.
    pub fn map_region(&self) -> Rect {
        let height = f64::from(self.height);
        Rect {
            x: 0,
            y: floor_px(height * MAP_TOP_FRACTION),
            width: self.width,
            height: floor_px(height * MAP_HEIGHT_FRACTION),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn floor_px(value: f64) -> u32 {
    value.floor().max(0.0) as u32
}

/// Share message for a session, e.g. `Mapped 3 potholes around Indiranagar with potholes.live.`
pub fn share_caption(count: usize, place: &str) -> String {
    let plural = if count == 1 { "" } else { "s" };
    format!("Mapped {count} pothole{plural} around {place} with potholes.live.")
}

/// Share message for one re-shared report.
pub fn report_caption(place: &str) -> String {
    format!("Found a pothole at {place}")
}

/// `lat, lon` with four decimals, for places without a name.
pub fn coordinate_label(point: GeoPoint) -> String {
    format!("{:.4}, {:.4}", point.lat, point.lon)
}

/// Build the draw list for a session of `count` points.
#[allow(clippy::cast_precision_loss)]
pub fn plan_layout(count: usize, options: &ShareOptions) -> Vec<DrawOp> {
    let width = options.width as f32;
    let height = options.height as f32;
    let center_x = width / 2.0;
    let map = options.map_region();

    let text = |text: String, baseline: f32, size: f32, weight: Weight, color: Rgb| DrawOp::Text {
        text,
        center_x,
        baseline,
        size,
        weight,
        color,
    };

    let mut ops = vec![
        DrawOp::FillGradient {
            stops: BACKGROUND_STOPS.to_vec(),
        },
        DrawOp::MapImage { rect: map },
    ];

    let title = options.title.as_deref().unwrap_or(DEFAULT_TITLE);
    ops.push(text(title.to_owned(), 100.0, 56.0, Weight::Bold, BRAND_GREEN));
    ops.push(text(count.to_string(), 280.0, 200.0, Weight::Bold, ALERT_RED));
    let noun = if count == 1 { "pothole" } else { "potholes" };
    ops.push(text(format!("{noun} mapped"), 350.0, 52.0, Weight::Regular, WHITE));

    if let Some(subtitle) = options.subtitle.as_deref().filter(|s| !s.is_empty()) {
        ops.push(text(
            format!("Location: {subtitle}"),
            410.0,
            40.0,
            Weight::Regular,
            SLATE_400,
        ));
    }

    let distance_m = options
        .stats
        .and_then(|stats| stats.distance_m)
        .filter(|d| *d > 0.0);
    if let Some(distance_m) = distance_m {
        let stats_y = map.y.saturating_add(map.height) as f32 + 80.0;
        ops.push(text(
            format!("{:.2}", distance_m / 1000.0),
            stats_y,
            72.0,
            Weight::Bold,
            BRAND_GREEN,
        ));
        ops.push(text(
            String::from("KM TRAVELED"),
            stats_y + 55.0,
            40.0,
            Weight::Regular,
            SLATE_400,
        ));
    }

    ops.push(text(
        String::from("Help fix our roads!"),
        height - 140.0,
        42.0,
        Weight::Regular,
        WHITE,
    ));
    ops.push(text(
        String::from("Join the community at potholes.live"),
        height - 80.0,
        36.0,
        Weight::Regular,
        SLATE_500,
    ));

    ops
}
