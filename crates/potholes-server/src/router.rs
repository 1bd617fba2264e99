//! Axum router construction.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`] with
//! CORS middleware enabled for browser clients.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /health` -- liveness and counters
/// - `POST /api/reports` -- dedup-checked single submission
/// - `POST /api/reports/batch` -- unchecked batch submission
/// - `GET /api/reports/owner/{owner_id}` -- recent reports of one owner
/// - `GET /api/reports/owner/{owner_id}/{report_id}/share` -- re-share one report (`image/png`)
/// - `GET /api/geocode` -- reverse geocode a coordinate
/// - `POST /api/share` -- compose a share image (`image/png`)
/// - `GET /ws/reports/nearby` -- live recent reports
/// - `GET /ws/reports/owner/{owner_id}` -- live reports of one owner
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // WebSocket
        .route("/ws/reports/nearby", get(ws::ws_nearby))
        .route("/ws/reports/owner/{owner_id}", get(ws::ws_owner))
        // REST API
        .route("/api/reports", post(handlers::submit_report))
        .route("/api/reports/batch", post(handlers::submit_batch))
        .route(
            "/api/reports/owner/{owner_id}",
            get(handlers::owner_reports),
        )
        .route(
            "/api/reports/owner/{owner_id}/{report_id}/share",
            get(handlers::share_report),
        )
        .route("/api/geocode", get(handlers::geocode))
        .route("/api/share", post(handlers::share_image))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
