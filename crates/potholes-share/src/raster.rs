//! Replays [`DrawOp`]s onto an RGBA canvas and encodes PNG.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};

use crate::error::ShareError;
use crate::layout::{DrawOp, Rect, Rgb, Weight};

/// Bundled regular face (DejaVu Sans).
static BUNDLED_REGULAR: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// Bundled bold face (DejaVu Sans Bold).
static BUNDLED_BOLD: &[u8] = include_bytes!("../assets/fonts/DejaVuSans-Bold.ttf");

/// Font faces for text ops.
///
/// The default set is the bundled DejaVu Sans pair, so share images carry
/// text without any configuration.
#[derive(Clone)]
pub struct FontSet {
    regular: Option<FontArc>,
    bold: Option<FontArc>,
}

impl FontSet {
    /// The faces compiled into the crate.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Font`] if a bundled face fails to parse.
    pub fn bundled() -> Result<Self, ShareError> {
        Ok(Self {
            regular: Some(parse_font("bundled regular", BUNDLED_REGULAR)?),
            bold: Some(parse_font("bundled bold", BUNDLED_BOLD)?),
        })
    }

    /// Bundled faces with configured files taking their place.
    ///
    /// A configured regular face without a bold one is used for both weights.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Font`] if a file cannot be read or parsed.
    pub fn load(regular: Option<&Path>, bold: Option<&Path>) -> Result<Self, ShareError> {
        let bundled = Self::bundled()?;
        let regular = regular.map(load_font).transpose()?;
        let bold = match bold {
            Some(path) => Some(load_font(path)?),
            None => regular.clone(),
        };
        Ok(Self {
            regular: regular.or(bundled.regular),
            bold: bold.or(bundled.bold),
        })
    }

    const fn empty() -> Self {
        Self {
            regular: None,
            bold: None,
        }
    }

    /// Whether any face is available.
    pub const fn has_text(&self) -> bool {
        self.regular.is_some()
    }

    fn face(&self, weight: Weight) -> Option<&FontArc> {
        match weight {
            Weight::Bold => self.bold.as_ref().or(self.regular.as_ref()),
            Weight::Regular => self.regular.as_ref(),
        }
    }
}

impl Default for FontSet {
    fn default() -> Self {
        Self::bundled().unwrap_or_else(|e| {
            tracing::error!("Bundled share font unusable: {e}");
            Self::empty()
        })
    }
}

impl std::fmt::Debug for FontSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontSet")
            .field("regular", &self.regular.is_some())
            .field("bold", &self.bold.is_some())
            .finish()
    }
}

fn load_font(path: &Path) -> Result<FontArc, ShareError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ShareError::Font(format!("{}: {e}", path.display())))?;
    FontArc::try_from_vec(bytes).map_err(|e| ShareError::Font(format!("{}: {e}", path.display())))
}

fn parse_font(name: &str, bytes: &'static [u8]) -> Result<FontArc, ShareError> {
    FontArc::try_from_slice(bytes).map_err(|e| ShareError::Font(format!("{name}: {e}")))
}

/// Paint `ops` onto a `width` x `height` canvas.
///
/// `map` is the decoded static map; it is scaled into each
/// [`DrawOp::MapImage`] rectangle.
pub fn rasterize(
    width: u32,
    height: u32,
    ops: &[DrawOp],
    map: &RgbaImage,
    fonts: &FontSet,
) -> RgbaImage {
    let mut canvas = RgbaImage::new(width, height);
    for op in ops {
        match op {
            DrawOp::FillGradient { stops } => fill_gradient(&mut canvas, stops),
            DrawOp::MapImage { rect } => draw_map(&mut canvas, map, *rect),
            DrawOp::Text {
                text,
                center_x,
                baseline,
                size,
                weight,
                color,
            } => {
                if let Some(font) = fonts.face(*weight) {
                    draw_text(&mut canvas, font, text, *center_x, *baseline, *size, *color);
                }
            }
        }
    }
    canvas
}

/// Encode `canvas` as PNG.
///
/// # Errors
///
/// Returns [`ShareError::Encode`] if encoding fails.
pub fn encode_png(canvas: &RgbaImage) -> Result<Vec<u8>, ShareError> {
    let mut out = Cursor::new(Vec::new());
    canvas
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ShareError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

/// Decode tile bytes into RGBA.
///
/// # Errors
///
/// Returns [`ShareError::TileDecode`] if the bytes are not a supported image.
pub fn decode_tile(bytes: &[u8]) -> Result<RgbaImage, ShareError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| ShareError::TileDecode(e.to_string()))
}

/// Color at `t` in `[0, 1]` along piecewise-linear `stops`.
pub(crate) fn gradient_at(stops: &[(f32, Rgb)], t: f32) -> Rgb {
    let Some(&(first_at, first)) = stops.first() else {
        return Rgb(0, 0, 0);
    };
    if t <= first_at {
        return first;
    }
    for pair in stops.windows(2) {
        let &[(a_at, a), (b_at, b)] = pair else {
            continue;
        };
        if t <= b_at {
            let span = b_at - a_at;
            let local = if span > 0.0 { (t - a_at) / span } else { 1.0 };
            return lerp(a, b, local);
        }
    }
    stops.last().map_or(first, |&(_, last)| last)
}

fn lerp(a: Rgb, b: Rgb, t: f32) -> Rgb {
    Rgb(
        lerp_channel(a.0, b.0, t),
        lerp_channel(a.1, b.1, t),
        lerp_channel(a.2, b.2, t),
    )
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lerp_channel(a: u8, b: u8, t: f32) -> u8 {
    let value = f32::from(a) + (f32::from(b) - f32::from(a)) * t.clamp(0.0, 1.0);
    value.round().clamp(0.0, 255.0) as u8
}

#[allow(clippy::cast_precision_loss)]
fn fill_gradient(canvas: &mut RgbaImage, stops: &[(f32, Rgb)]) {
    let last_row = canvas.height().saturating_sub(1).max(1) as f32;
    let width = canvas.width();
    for y in 0..canvas.height() {
        let Rgb(r, g, b) = gradient_at(stops, y as f32 / last_row);
        let pixel = Rgba([r, g, b, 0xff]);
        for x in 0..width {
            canvas.put_pixel(x, y, pixel);
        }
    }
}

fn draw_map(canvas: &mut RgbaImage, map: &RgbaImage, rect: Rect) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    let (x, y) = (i64::from(rect.x), i64::from(rect.y));
    if map.dimensions() == (rect.width, rect.height) {
        imageops::overlay(canvas, map, x, y);
    } else {
        let scaled = imageops::resize(map, rect.width, rect.height, FilterType::Triangle);
        imageops::overlay(canvas, &scaled, x, y);
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn draw_text(
    canvas: &mut RgbaImage,
    font: &FontArc,
    text: &str,
    center_x: f32,
    baseline: f32,
    size: f32,
    color: Rgb,
) {
    let scale = PxScale::from(size);
    let scaled = font.as_scaled(scale);

    let mut caret = 0.0_f32;
    let mut previous = None;
    let mut glyphs = Vec::with_capacity(text.len());
    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(prev) = previous {
            caret += scaled.kern(prev, id);
        }
        glyphs.push(id.with_scale_and_position(scale, point(caret, baseline)));
        caret += scaled.h_advance(id);
        previous = Some(id);
    }

    let left = center_x - caret / 2.0;
    let (canvas_w, canvas_h) = (i64::from(canvas.width()), i64::from(canvas.height()));
    for mut glyph in glyphs {
        glyph.position.x += left;
        let Some(outline) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outline.px_bounds();
        let (min_x, min_y) = (bounds.min.x as i64, bounds.min.y as i64);
        outline.draw(|gx, gy, coverage| {
            let x = min_x.saturating_add(i64::from(gx));
            let y = min_y.saturating_add(i64::from(gy));
            if x < 0 || y < 0 || x >= canvas_w || y >= canvas_h {
                return;
            }
            let pixel = canvas.get_pixel_mut(x as u32, y as u32);
            blend(pixel, color, coverage);
        });
    }
}

fn blend(pixel: &mut Rgba<u8>, color: Rgb, coverage: f32) {
    let [r, g, b, a] = pixel.0;
    let Rgb(nr, ng, nb) = lerp(Rgb(r, g, b), color, coverage);
    *pixel = Rgba([nr, ng, nb, a]);
}

/// A share image renderer: fonts plus the op replay.
#[derive(Debug, Clone, Default)]
pub struct Rasterizer {
    fonts: Arc<FontSet>,
}

impl Rasterizer {
    /// Create a rasterizer over `fonts`.
    pub fn new(fonts: FontSet) -> Self {
        if !fonts.has_text() {
            tracing::warn!("No usable share font; text will be left off share images");
        }
        Self {
            fonts: Arc::new(fonts),
        }
    }

    /// Render and encode, off the async runtime's worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::TileDecode`] for an unreadable tile and
    /// [`ShareError::Encode`] if PNG encoding fails.
    pub async fn render_png(
        &self,
        width: u32,
        height: u32,
        ops: Vec<DrawOp>,
        tile: Vec<u8>,
    ) -> Result<Vec<u8>, ShareError> {
        let fonts = Arc::clone(&self.fonts);
        tokio::task::spawn_blocking(move || {
            let map = decode_tile(&tile)?;
            let canvas = rasterize(width, height, &ops, &map, &fonts);
            encode_png(&canvas)
        })
        .await
        .map_err(|e| ShareError::Encode(format!("render task failed: {e}")))?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::layout::BACKGROUND_STOPS;

    #[test]
    fn gradient_hits_stops_and_midpoints() {
        assert_eq!(gradient_at(&BACKGROUND_STOPS, 0.0), Rgb(0x0f, 0x17, 0x2a));
        assert_eq!(gradient_at(&BACKGROUND_STOPS, 0.5), Rgb(0x1e, 0x29, 0x3b));
        assert_eq!(gradient_at(&BACKGROUND_STOPS, 1.0), Rgb(0x0f, 0x17, 0x2a));
        let mid = gradient_at(&BACKGROUND_STOPS, 0.15);
        assert!(mid.0 > 0x0f && mid.0 < 0x1e);
    }

    #[test]
    fn map_is_scaled_into_its_rect() {
        let map = RgbaImage::from_pixel(10, 10, Rgba([200, 0, 0, 255]));
        let ops = vec![
            DrawOp::FillGradient {
                stops: BACKGROUND_STOPS.to_vec(),
            },
            DrawOp::MapImage {
                rect: Rect {
                    x: 0,
                    y: 20,
                    width: 40,
                    height: 40,
                },
            },
        ];
        let canvas = rasterize(40, 80, &ops, &map, &FontSet::empty());
        assert_eq!(canvas.get_pixel(20, 40).0, [200, 0, 0, 255]);
        assert_ne!(canvas.get_pixel(20, 5).0, [200, 0, 0, 255]);
        assert_ne!(canvas.get_pixel(20, 70).0, [200, 0, 0, 255]);
    }

    #[test]
    fn text_without_fonts_is_skipped() {
        let map = RgbaImage::new(1, 1);
        let ops = vec![DrawOp::Text {
            text: String::from("hello"),
            center_x: 10.0,
            baseline: 10.0,
            size: 12.0,
            weight: Weight::Bold,
            color: Rgb(255, 255, 255),
        }];
        let canvas = rasterize(20, 20, &ops, &map, &FontSet::empty());
        assert!(canvas.pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    fn alert_red_pixels(canvas: &RgbaImage, rows: std::ops::Range<u32>) -> Vec<(u32, u32)> {
        canvas
            .enumerate_pixels()
            .filter(|(_, y, p)| rows.contains(y) && p.0[0] > 0xc0 && p.0[1] < 0x90 && p.0[2] < 0x90)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    #[test]
    fn bundled_fonts_draw_centered_text_on_the_baseline() {
        let map = RgbaImage::new(1, 1);
        let ops = vec![
            DrawOp::FillGradient {
                stops: BACKGROUND_STOPS.to_vec(),
            },
            DrawOp::Text {
                text: String::from("42"),
                center_x: 540.0,
                baseline: 280.0,
                size: 200.0,
                weight: Weight::Bold,
                color: Rgb(0xff, 0x44, 0x44),
            },
        ];
        let canvas = rasterize(1080, 400, &ops, &map, &FontSet::default());

        let red = alert_red_pixels(&canvas, 0..400);
        assert!(red.len() > 1_000, "only {} text pixels", red.len());

        let min_x = red.iter().map(|p| p.0).min().unwrap();
        let max_x = red.iter().map(|p| p.0).max().unwrap();
        let min_y = red.iter().map(|p| p.1).min().unwrap();
        let max_y = red.iter().map(|p| p.1).max().unwrap();
        // Digits sit on the baseline and stay below the em box top.
        assert!(max_y <= 282, "ink below baseline at {max_y}");
        assert!(min_y >= 80, "ink above em box at {min_y}");
        let ink_center = min_x.midpoint(max_x);
        assert!(ink_center.abs_diff(540) <= 12, "ink centered at {ink_center}");
    }

    #[test]
    fn bold_and_regular_faces_differ() {
        let map = RgbaImage::new(1, 1);
        let line = |weight| {
            vec![DrawOp::Text {
                text: String::from("mapped"),
                center_x: 200.0,
                baseline: 80.0,
                size: 60.0,
                weight,
                color: Rgb(0xff, 0x44, 0x44),
            }]
        };
        let fonts = FontSet::default();
        let regular = rasterize(400, 100, &line(Weight::Regular), &map, &fonts);
        let bold = rasterize(400, 100, &line(Weight::Bold), &map, &fonts);
        let inked = |canvas: &RgbaImage| canvas.pixels().filter(|p| p.0[0] > 0x80).count();
        assert!(inked(&regular) > 0);
        assert!(inked(&bold) > inked(&regular));
    }

    #[test]
    fn load_without_overrides_keeps_bundled_faces() {
        let fonts = FontSet::load(None, None).unwrap();
        assert!(fonts.has_text());
        assert!(FontSet::bundled().unwrap().has_text());
        assert!(!FontSet::empty().has_text());
    }

    #[test]
    fn png_round_trips_dimensions() {
        let canvas = RgbaImage::new(7, 5);
        let png = encode_png(&canvas).unwrap();
        let decoded = decode_tile(&png).unwrap();
        assert_eq!(decoded.dimensions(), (7, 5));
    }

    #[test]
    fn garbage_tile_is_a_decode_error() {
        assert!(matches!(
            decode_tile(b"not an image"),
            Err(ShareError::TileDecode(_))
        ));
    }

    #[test]
    fn missing_font_file_is_reported() {
        let err = FontSet::load(Some(Path::new("/nonexistent/font.ttf")), None).unwrap_err();
        assert!(matches!(err, ShareError::Font(_)));
    }
}
