//! Share image composition.
//!
//! `compose` frames the session on a static map, fetches that map once,
//! lays out the text around it and returns an encoded PNG. The compositor
//! holds no mutable state and can serve independent sessions concurrently.

use potholes_types::GeoPoint;
use tokio_util::sync::CancellationToken;

use crate::error::ShareError;
use crate::layout::{DrawOp, ShareOptions, plan_layout};
use crate::overlay::{Camera, overlay_spec, resolve_pin_url};
use crate::raster::Rasterizer;
use crate::tiles::{DEFAULT_STYLE, TileFetcher, TileRequest};

/// Everything decided before any I/O happens.
#[derive(Debug, Clone, PartialEq)]
pub struct SharePlan {
    /// Map framing.
    pub camera: Camera,
    /// What to ask the tile service for.
    pub tile_request: TileRequest,
    /// Composition steps.
    pub ops: Vec<DrawOp>,
}

/// A finished share image.
#[derive(Debug, Clone)]
pub struct ShareImage {
    /// PNG bytes.
    pub png: Vec<u8>,
    /// Canvas width.
    pub width: u32,
    /// Canvas height.
    pub height: u32,
    /// Map framing used.
    pub camera: Camera,
}

/// Result of a composition that did not fail.
#[derive(Debug, Clone)]
pub enum ComposeOutcome {
    /// The image was produced.
    Image(ShareImage),
    /// The caller cancelled before the image was ready.
    Cancelled,
}

impl ComposeOutcome {
    /// The image, unless the composition was cancelled.
    pub fn into_image(self) -> Option<ShareImage> {
        match self {
            Self::Image(image) => Some(image),
            Self::Cancelled => None,
        }
    }
}

/// Static settings shared by every composition.
#[derive(Debug, Clone)]
pub struct CompositorSettings {
    /// Tile style identifier.
    pub style: String,
    /// Pin image URL.
    pub pin_url: String,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            style: DEFAULT_STYLE.to_owned(),
            pin_url: resolve_pin_url(None),
        }
    }
}

/// Builds share images from session points.
#[derive(Debug, Clone)]
pub struct ShareCompositor<T> {
    tiles: T,
    rasterizer: Rasterizer,
    settings: CompositorSettings,
}

impl<T: TileFetcher> ShareCompositor<T> {
    /// Create a compositor over a tile source.
    pub const fn new(tiles: T, rasterizer: Rasterizer, settings: CompositorSettings) -> Self {
        Self {
            tiles,
            rasterizer,
            settings,
        }
    }

    /// Compute camera, tile request and draw list for a session.
    pub fn plan(&self, points: &[GeoPoint], options: &ShareOptions) -> SharePlan {
        let map = options.map_region();
        let camera = Camera::framing(points, map.width, map.height);
        let tile_request = TileRequest {
            points: points.to_vec(),
            width: map.width,
            height: map.height,
            style: self.settings.style.clone(),
            pin_url: self.settings.pin_url.clone(),
            center: camera.to_param(),
            overlay: overlay_spec(points, &self.settings.pin_url),
        };
        SharePlan {
            camera,
            tile_request,
            ops: plan_layout(points.len(), options),
        }
    }

    /// Compose a share image for `points`.
    ///
    /// Cancelling `cancel` at any point before the image is ready yields
    /// [`ComposeOutcome::Cancelled`], never an error.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::InvalidCanvas`] for unusable dimensions,
    /// [`ShareError::TileFetch`] or [`ShareError::TileTransport`] when the map
    /// cannot be fetched (not retried), and decode or encode errors from
    /// rendering.
    pub async fn compose(
        &self,
        points: &[GeoPoint],
        options: &ShareOptions,
        cancel: &CancellationToken,
    ) -> Result<ComposeOutcome, ShareError> {
        options.validate()?;
        let plan = self.plan(points, options);

        tracing::debug!(
            points = points.len(),
            width = options.width,
            height = options.height,
            center = %plan.tile_request.center,
            "Composing share image"
        );

        let tile = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Share composition cancelled during tile fetch");
                return Ok(ComposeOutcome::Cancelled);
            }
            fetched = self.tiles.fetch(&plan.tile_request) => fetched?,
        };

        let png = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Share composition cancelled during rendering");
                return Ok(ComposeOutcome::Cancelled);
            }
            rendered = self
                .rasterizer
                .render_png(options.width, options.height, plan.ops, tile) => rendered?,
        };

        tracing::info!(
            points = points.len(),
            bytes = png.len(),
            "Share image composed"
        );

        Ok(ComposeOutcome::Image(ShareImage {
            png,
            width: options.width,
            height: options.height,
            camera: plan.camera,
        }))
    }
}
