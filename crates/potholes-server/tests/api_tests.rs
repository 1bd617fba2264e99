//! Integration tests for the HTTP API.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. State is built over the in-memory store, blank
//! tiles and a disabled geocoder, so nothing touches the network.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use potholes_db::InMemoryReportStore;
use potholes_server::handlers::CAPTION_HEADER;
use potholes_server::router::build_router;
use potholes_server::state::AppState;
use potholes_share::{
    BlankTileFetcher, CompositorSettings, GeocoderBackend, HttpTileFetcher, Rasterizer,
    ShareCompositor, TileBackend,
};
use serde_json::{Value, json};
use tower::ServiceExt;

fn make_state(tiles: TileBackend) -> Arc<AppState> {
    let compositor = ShareCompositor::new(tiles, Rasterizer::default(), CompositorSettings::default());
    Arc::new(AppState::new(
        InMemoryReportStore::new().into(),
        compositor,
        GeocoderBackend::Disabled,
    ))
}

fn make_test_state() -> Arc<AppState> {
    make_state(TileBackend::Blank(BlankTileFetcher))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_health() {
    let router = build_router(make_test_state());

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
    assert_eq!(json["active_subscriptions"], 0);
}

#[tokio::test]
async fn test_submit_then_duplicate() {
    let router = build_router(make_test_state());
    let report = json!({"lat": 12.9716, "lon": 77.5946, "ts": 1_700_000_000_000_i64, "uid": "anon-1"});

    let response = router
        .clone()
        .oneshot(post_json("/api/reports", &report))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "accepted");
    let first_id = json["id"].clone();

    // About 5.5 m north of the first report.
    let nearby = json!({"lat": 12.97165, "lon": 77.5946, "ts": 1_700_000_000_500_i64});
    let response = router
        .oneshot(post_json("/api/reports", &nearby))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "rejected");
    assert_eq!(json["reason"]["kind"], "duplicate");
    assert_eq!(json["reason"]["existing_id"], first_id);
}

#[tokio::test]
async fn test_submit_invalid_is_bad_request() {
    let router = build_router(make_test_state());
    let report = json!({"lat": 95.0, "lon": 10.0, "ts": 1});

    let response = router
        .oneshot(post_json("/api/reports", &report))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 400);
    assert!(json["error"].as_str().unwrap().contains("invalid request"));
}

#[tokio::test]
async fn test_batch_skips_dedup() {
    let router = build_router(make_test_state());
    let same_spot = json!({"lat": 12.0, "lon": 77.0, "uid": "rider"});
    let batch = json!([same_spot, same_spot, same_spot]);

    let response = router
        .clone()
        .oneshot(post_json("/api/reports/batch", &batch))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["count"], 3);
    assert_eq!(json["ids"].as_array().unwrap().len(), 3);

    let response = router
        .oneshot(
            Request::get("/api/reports/owner/rider")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_batch_with_invalid_report_stores_nothing() {
    let router = build_router(make_test_state());
    let batch = json!([
        {"lat": 12.0, "lon": 77.0, "uid": "rider"},
        {"lat": 12.0, "lon": 277.0, "uid": "rider"}
    ]);

    let response = router
        .clone()
        .oneshot(post_json("/api/reports/batch", &batch))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("report 1"));

    let response = router
        .oneshot(
            Request::get("/api/reports/owner/rider")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_owner_reports_filtered_and_newest_first() {
    let router = build_router(make_test_state());
    let batch = json!([
        {"lat": 10.0, "lon": 70.0, "ts": 1, "uid": "a"},
        {"lat": 11.0, "lon": 71.0, "ts": 3, "uid": "a"},
        {"lat": 12.0, "lon": 72.0, "ts": 2, "uid": "b"},
        {"lat": 13.0, "lon": 73.0, "ts": 2, "uid": "a"}
    ]);
    router
        .clone()
        .oneshot(post_json("/api/reports/batch", &batch))
        .await
        .unwrap();

    let response = router
        .oneshot(Request::get("/api/reports/owner/a").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    let ts: Vec<i64> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["ts"].as_i64().unwrap())
        .collect();
    assert_eq!(ts, vec![3, 2, 1]);
    assert!(json.as_array().unwrap().iter().all(|r| r["owner_id"] == "a"));
}

#[tokio::test]
async fn test_geocode_disabled_returns_null() {
    let router = build_router(make_test_state());

    let response = router
        .oneshot(
            Request::get("/api/geocode?lat=12.97&lon=77.59")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert!(json["place_name"].is_null());
}

#[tokio::test]
async fn test_geocode_rejects_out_of_range() {
    let router = build_router(make_test_state());

    let response = router
        .oneshot(
            Request::get("/api/geocode?lat=120&lon=77.59")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_share_returns_png() {
    let router = build_router(make_test_state());
    let request = json!({
        "points": [{"lat": 12.97, "lon": 77.59}, {"lat": 12.98, "lon": 77.60}],
        "width": 216,
        "height": 384
    });

    let response = router
        .oneshot(post_json("/api/share", &request))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(content_type, "image/png");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[tokio::test]
async fn test_share_caption_names_the_place() {
    let router = build_router(make_test_state());
    let request = json!({
        "points": [{"lat": 12.97, "lon": 77.59}, {"lat": 12.98, "lon": 77.60}],
        "width": 108,
        "height": 192,
        "subtitle": "MG Road"
    });

    let response = router
        .oneshot(post_json("/api/share", &request))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[CAPTION_HEADER],
        "Mapped 2 potholes around MG Road with potholes.live."
    );
}

async fn submit_for(router: &axum::Router, owner: &str) -> String {
    let report = json!({"lat": 12.9716, "lon": 77.5946, "ts": 1, "uid": owner});
    let response = router
        .clone()
        .oneshot(post_json("/api/reports", &report))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_to_json(response.into_body()).await;
    json["id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn test_share_single_report_card() {
    let router = build_router(make_test_state());
    let id = submit_for(&router, "rider").await;

    let response = router
        .oneshot(
            Request::get(format!("/api/reports/owner/rider/{id}/share"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Geocoding is off, so the card falls back to coordinates.
    assert_eq!(
        response.headers()[CAPTION_HEADER],
        "Found a pothole at 12.9716, 77.5946"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    // IHDR width and height: 1200 x 1200.
    assert_eq!(&bytes[16..24], &[0, 0, 0x04, 0xb0, 0, 0, 0x04, 0xb0]);
}

#[tokio::test]
async fn test_share_single_report_of_other_owner_is_not_found() {
    let router = build_router(make_test_state());
    let id = submit_for(&router, "rider").await;

    let response = router
        .oneshot(
            Request::get(format!("/api/reports/owner/someone-else/{id}/share"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_share_empty_session_succeeds() {
    let router = build_router(make_test_state());
    let request = json!({"width": 108, "height": 192});

    let response = router
        .oneshot(post_json("/api/share", &request))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_share_invalid_canvas_is_bad_request() {
    let router = build_router(make_test_state());
    let request = json!({"points": [], "width": 0});

    let response = router
        .oneshot(post_json("/api/share", &request))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_share_tile_failure_is_bad_gateway() {
    // Nothing listens on the discard port; the connection is refused.
    let tiles = HttpTileFetcher::new("http://127.0.0.1:9/static-map", Duration::from_secs(5)).unwrap();
    let router = build_router(make_state(TileBackend::Http(tiles)));
    let request = json!({"points": [{"lat": 12.97, "lon": 77.59}], "width": 108, "height": 192});

    let response = router
        .oneshot(post_json("/api/share", &request))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 502);
}

#[tokio::test]
async fn test_ws_route_requires_upgrade() {
    let router = build_router(make_test_state());

    let response = router
        .oneshot(
            Request::get("/ws/reports/owner/anon-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
