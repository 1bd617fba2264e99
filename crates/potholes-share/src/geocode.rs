//! Reverse geocoding for share subtitles.
//!
//! A place name is decoration: every failure degrades to `None` and is never
//! surfaced to the caller.

use std::future::Future;
use std::time::Duration;

use potholes_types::GeoPoint;
use tokio_util::sync::CancellationToken;

/// Resolves a coordinate to a human-readable place name.
pub trait ReverseGeocoder: Send + Sync {
    /// Place name for `point`, or `None` on any failure or cancellation.
    fn reverse(
        &self,
        point: GeoPoint,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Option<String>> + Send;
}

/// Geocoder backed by an HTTP proxy returning a feature collection.
#[derive(Debug, Clone)]
pub struct HttpGeocoder {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGeocoder {
    /// Create a geocoder for `endpoint` with a per-request timeout.
    ///
    /// Returns `None` if the HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Option<Self> {
        match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => Some(Self {
                client,
                endpoint: endpoint.to_owned(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build geocoder HTTP client");
                None
            }
        }
    }

    async fn lookup(&self, point: GeoPoint) -> Option<String> {
        let response = match self
            .client
            .get(&self.endpoint)
            .query(&[("lat", point.lat), ("lon", point.lon)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, lat = point.lat, lon = point.lon, "Reverse geocode error");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, lat = point.lat, lon = point.lon, "Reverse geocode failed");
            return None;
        }

        match response.json::<serde_json::Value>().await {
            Ok(json) => extract_place_name(&json),
            Err(e) => {
                tracing::warn!(error = %e, "Reverse geocode response parse failed");
                None
            }
        }
    }
}

impl ReverseGeocoder for HttpGeocoder {
    async fn reverse(&self, point: GeoPoint, cancel: &CancellationToken) -> Option<String> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            name = self.lookup(point) => name,
        }
    }
}

/// `features[0].place_name` from a geocoding response.
pub fn extract_place_name(json: &serde_json::Value) -> Option<String> {
    json.get("features")
        .and_then(|f| f.get(0))
        .and_then(|f| f.get("place_name"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
}

/// The geocoder selected by configuration.
#[derive(Debug, Clone)]
pub enum GeocoderBackend {
    /// Remote geocoding proxy.
    Http(HttpGeocoder),
    /// Geocoding turned off; always `None`.
    Disabled,
}

impl ReverseGeocoder for GeocoderBackend {
    async fn reverse(&self, point: GeoPoint, cancel: &CancellationToken) -> Option<String> {
        match self {
            Self::Http(geocoder) => geocoder.reverse(point, cancel).await,
            Self::Disabled => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};

    use super::*;

    /// Serve `router` on an ephemeral local port and return the base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    async fn reverse_at(base: &str) -> Option<String> {
        let geocoder = HttpGeocoder::new(&format!("{base}/geocode"), Duration::from_secs(5)).unwrap();
        geocoder
            .reverse(GeoPoint::new(12.97, 77.64), &CancellationToken::new())
            .await
    }

    #[test]
    fn place_name_from_first_feature() {
        let json = serde_json::json!({
            "features": [
                {"place_name": "Indiranagar, Bengaluru, Karnataka, India"},
                {"place_name": "Bengaluru"}
            ]
        });
        assert_eq!(
            extract_place_name(&json).as_deref(),
            Some("Indiranagar, Bengaluru, Karnataka, India")
        );
    }

    #[test]
    fn missing_features_yield_none() {
        assert!(extract_place_name(&serde_json::json!({})).is_none());
        assert!(extract_place_name(&serde_json::json!({"features": []})).is_none());
        assert!(extract_place_name(&serde_json::json!({"features": [{"text": "x"}]})).is_none());
    }

    #[tokio::test]
    async fn http_lookup_reads_first_place_name() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let router = Router::new().route(
            "/geocode",
            get(move |Query(params): Query<HashMap<String, String>>| {
                recorder.lock().unwrap().push(params);
                async {
                    Json(serde_json::json!({
                        "features": [
                            {"place_name": "Indiranagar, Bengaluru"},
                            {"place_name": "Bengaluru"}
                        ]
                    }))
                }
            }),
        );
        let base = serve(router).await;

        assert_eq!(reverse_at(&base).await.as_deref(), Some("Indiranagar, Bengaluru"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen.first().and_then(|p| p.get("lat")).map(String::as_str), Some("12.97"));
        assert_eq!(seen.first().and_then(|p| p.get("lon")).map(String::as_str), Some("77.64"));
    }

    #[tokio::test]
    async fn http_error_status_yields_none() {
        let router = Router::new().route(
            "/geocode",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "try later") }),
        );
        let base = serve(router).await;
        assert!(reverse_at(&base).await.is_none());
    }

    #[tokio::test]
    async fn unparsable_body_yields_none() {
        let router = Router::new().route("/geocode", get(|| async { "not json" }));
        let base = serve(router).await;
        assert!(reverse_at(&base).await.is_none());
    }

    #[tokio::test]
    async fn refused_connection_yields_none() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(reverse_at(&format!("http://{addr}")).await.is_none());
    }

    #[tokio::test]
    async fn disabled_geocoder_returns_none() {
        let cancel = CancellationToken::new();
        let name = GeocoderBackend::Disabled
            .reverse(GeoPoint::new(12.97, 77.59), &cancel)
            .await;
        assert!(name.is_none());
    }

    #[tokio::test]
    async fn cancelled_lookup_returns_none() {
        // Unroutable address: the request would hang until the timeout.
        let geocoder = HttpGeocoder::new("http://10.255.255.1/geocode", Duration::from_secs(30));
        let Some(geocoder) = geocoder else {
            return;
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(geocoder.reverse(GeoPoint::new(0.0, 0.0), &cancel).await.is_none());
    }
}
