//! Static map tile fetching.
//!
//! The compositor asks a [`TileFetcher`] for one raster image covering the
//! map region. The HTTP adapter posts the request as JSON to a map proxy
//! that holds the provider token; the blank adapter paints a flat tile for
//! offline use and tests.

use std::future::Future;
use std::io::Cursor;
use std::time::Duration;

use image::{ImageFormat, Rgba, RgbaImage};
use potholes_types::GeoPoint;
use serde::Serialize;

use crate::error::ShareError;

/// Map style requested from the tile service.
pub const DEFAULT_STYLE: &str = "mapbox/navigation-night-v1";

/// Color of blank tiles (slate 800).
const BLANK_TILE: Rgba<u8> = Rgba([0x1e, 0x29, 0x3b, 0xff]);

/// Everything the tile service needs to render the map region.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileRequest {
    /// Session points, in path order.
    pub points: Vec<GeoPoint>,
    /// Map region width in pixels.
    pub width: u32,
    /// Map region height in pixels.
    pub height: u32,
    /// Map style identifier.
    pub style: String,
    /// Pin image URL.
    pub pin_url: String,
    /// Camera as `lon,lat,zoom`.
    pub center: String,
    /// Overlay list (path, then pins).
    pub overlay: String,
}

/// Source of static map images.
pub trait TileFetcher: Send + Sync {
    /// Fetch encoded image bytes for `request`.
    ///
    /// Cancellation is handled by the caller dropping this future.
    fn fetch(&self, request: &TileRequest)
    -> impl Future<Output = Result<Vec<u8>, ShareError>> + Send;
}

/// Posts [`TileRequest`]s to a map proxy endpoint.
#[derive(Debug, Clone)]
pub struct HttpTileFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTileFetcher {
    /// Create a fetcher for `endpoint` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::TileTransport`] if the HTTP client cannot be
    /// built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ShareError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShareError::TileTransport(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_owned(),
        })
    }
}

impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, request: &TileRequest) -> Result<Vec<u8>, ShareError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            points = request.points.len(),
            width = request.width,
            height = request.height,
            center = %request.center,
            "Requesting static map"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| ShareError::TileTransport(format!("tile request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(ShareError::TileFetch {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ShareError::TileTransport(format!("tile body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Paints a flat tile of the requested size.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankTileFetcher;

impl TileFetcher for BlankTileFetcher {
    async fn fetch(&self, request: &TileRequest) -> Result<Vec<u8>, ShareError> {
        let tile = RgbaImage::from_pixel(request.width.max(1), request.height.max(1), BLANK_TILE);
        let mut out = Cursor::new(Vec::new());
        tile.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| ShareError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }
}

/// The tile source selected by configuration.
#[derive(Debug, Clone)]
pub enum TileBackend {
    /// Remote map proxy.
    Http(HttpTileFetcher),
    /// Offline flat tiles.
    Blank(BlankTileFetcher),
}

impl TileBackend {
    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Blank(_) => "blank",
        }
    }
}

impl TileFetcher for TileBackend {
    async fn fetch(&self, request: &TileRequest) -> Result<Vec<u8>, ShareError> {
        match self {
            Self::Http(fetcher) => fetcher.fetch(request).await,
            Self::Blank(fetcher) => fetcher.fetch(request).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::body::Bytes;
    use axum::http::{StatusCode, header};
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    /// Serve `router` on an ephemeral local port and return the base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    fn fetcher(base: &str) -> HttpTileFetcher {
        HttpTileFetcher::new(&format!("{base}/static-map"), Duration::from_secs(5)).unwrap()
    }

    fn request() -> TileRequest {
        TileRequest {
            points: vec![GeoPoint::new(12.0, 77.0)],
            width: 64,
            height: 32,
            style: DEFAULT_STYLE.to_owned(),
            pin_url: String::from("https://potholes.live/icon-192.png"),
            center: String::from("77.000000,12.000000,16.50"),
            overlay: String::new(),
        }
    }

    #[tokio::test]
    async fn blank_tile_matches_requested_size() {
        let bytes = TileBackend::Blank(BlankTileFetcher)
            .fetch(&request())
            .await
            .unwrap();
        let tile = image::load_from_memory(&bytes).unwrap();
        assert_eq!((tile.width(), tile.height()), (64, 32));
    }

    #[tokio::test]
    async fn http_fetch_posts_request_and_returns_image() {
        let png = BlankTileFetcher.fetch(&request()).await.unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let body = Bytes::from(png);
        let router = Router::new().route(
            "/static-map",
            post(move |Json(posted): Json<serde_json::Value>| {
                recorder.lock().unwrap().push(posted);
                let body = body.clone();
                async move { ([(header::CONTENT_TYPE, "image/png")], body) }
            }),
        );
        let base = serve(router).await;

        let bytes = fetcher(&base).fetch(&request()).await.unwrap();
        let tile = image::load_from_memory(&bytes).unwrap();
        assert_eq!((tile.width(), tile.height()), (64, 32));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["center"], "77.000000,12.000000,16.50");
        assert_eq!(seen[0]["pinUrl"], "https://potholes.live/icon-192.png");
        assert_eq!(seen[0]["width"], 64);
    }

    #[tokio::test]
    async fn http_error_status_is_reported_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/static-map",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { (StatusCode::SERVICE_UNAVAILABLE, "quota exceeded") }
            }),
        );
        let base = serve(router).await;

        let err = fetcher(&base).fetch(&request()).await.unwrap_err();
        assert!(
            matches!(&err, ShareError::TileFetch { status: 503, body } if body == "quota exceeded"),
            "unexpected error: {err:?}"
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher(&format!("http://{addr}"))
            .fetch(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::TileTransport(_)));
    }

    #[test]
    fn request_uses_camel_case_keys() {
        let json = serde_json::to_value(request()).unwrap();
        assert!(json.get("pinUrl").is_some());
        assert_eq!(json.get("style").and_then(|s| s.as_str()), Some(DEFAULT_STYLE));
    }
}
