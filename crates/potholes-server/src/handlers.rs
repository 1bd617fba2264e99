//! REST handlers for report ingest, owner queries, geocoding and share images.
//!
//! All handlers receive `Arc<AppState>` via Axum's `State` extractor.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use potholes_core::{OWNER_LIMIT, SubmitOutcome};
use potholes_db::ReportRepository;
use potholes_geo::{compute_bounds, path_length_meters};
use potholes_share::{
    ComposeOutcome, ReverseGeocoder, ShareOptions, TripStats, coordinate_label, report_caption,
    share_caption,
};
use potholes_types::{FullResultSet, GeoPoint, NewReport, OwnerId, ReportId};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Response header carrying the suggested share message for an image.
pub const CAPTION_HEADER: &str = "x-share-caption";

// =========================================================================
// Wire types
// =========================================================================

/// A report as submitted by a client.
///
/// Same shape as [`NewReport`], except `ts` may be omitted and then defaults
/// to the time the server received it.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportSubmission {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Detection time in epoch milliseconds.
    #[serde(default)]
    pub ts: Option<i64>,
    /// Reporting user or anonymous session.
    #[serde(default, alias = "uid")]
    pub owner_id: Option<OwnerId>,
    /// Detector model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Detector confidence.
    #[serde(default, alias = "conf")]
    pub confidence: Option<f64>,
}

impl ReportSubmission {
    /// Fill in defaults, stamping missing timestamps with `received_at`.
    pub fn into_new_report(self, received_at: DateTime<Utc>) -> NewReport {
        NewReport {
            lat: self.lat,
            lon: self.lon,
            ts: self.ts.unwrap_or_else(|| received_at.timestamp_millis()),
            owner_id: self.owner_id,
            model: self.model,
            confidence: self.confidence,
        }
    }
}

/// Response body of a batch submission.
#[derive(Debug, Clone, Serialize)]
pub struct BatchAccepted {
    /// Number of reports stored.
    pub count: usize,
    /// Assigned ids, in submission order.
    pub ids: Vec<ReportId>,
}

/// Query string of `/api/geocode`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GeocodeQuery {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

/// Response body of `/api/geocode`.
#[derive(Debug, Clone, Serialize)]
pub struct GeocodeResponse {
    /// Place name, or `null` when unknown.
    pub place_name: Option<String>,
}

/// Request body of `/api/share`.
#[derive(Debug, Clone, Deserialize)]
pub struct ShareRequest {
    /// Session points in path order.
    #[serde(default)]
    pub points: Vec<GeoPoint>,
    /// Canvas and text options.
    #[serde(flatten)]
    pub options: ShareOptions,
}

/// Response body of `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `ok` when the process answers.
    pub status: &'static str,
    /// Active store adapter.
    pub store: &'static str,
    /// Live subscription tasks.
    pub active_subscriptions: usize,
    /// Change streams registered with the store.
    pub active_streams: usize,
    /// When the service started.
    pub started_at: DateTime<Utc>,
    /// Seconds since start.
    pub uptime_secs: i64,
}

// =========================================================================
// Handlers
// =========================================================================

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let started_at = state.started_at();
    Json(HealthResponse {
        status: "ok",
        store: state.store().name(),
        active_subscriptions: state.subscriptions().active_subscriptions(),
        active_streams: state.store().active_streams(),
        started_at,
        uptime_secs: Utc::now().signed_duration_since(started_at).num_seconds(),
    })
}

/// `POST /api/reports`
///
/// `201 Created` when stored, `200 OK` with a rejected outcome when it
/// duplicates a nearby report, `400` when invalid.
pub async fn submit_report(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<ReportSubmission>,
) -> Result<(StatusCode, Json<SubmitOutcome>), ApiError> {
    let report = submission.into_new_report(Utc::now());
    let outcome = state.gate().submit(report).await?;
    let status = if outcome.accepted_id().is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// `POST /api/reports/batch`
///
/// Stores every report without duplicate checks, or none of them.
pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    Json(submissions): Json<Vec<ReportSubmission>>,
) -> Result<(StatusCode, Json<BatchAccepted>), ApiError> {
    let received_at = Utc::now();
    let reports = submissions
        .into_iter()
        .map(|s| s.into_new_report(received_at))
        .collect();
    let ids = state.gate().submit_batch(reports).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(BatchAccepted {
            count: ids.len(),
            ids,
        }),
    ))
}

/// `GET /api/reports/owner/{owner_id}`
///
/// The most recent reports of one owner, newest first.
pub async fn owner_reports(
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
) -> Result<Json<FullResultSet>, ApiError> {
    let owner_id = OwnerId::new(owner_id);
    let reports = state
        .store()
        .query_recent_by_owner(&owner_id, OWNER_LIMIT)
        .await?;
    Ok(Json(FullResultSet::new(reports)))
}

/// `GET /api/geocode?lat=..&lon=..`
pub async fn geocode(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GeocodeQuery>,
) -> Result<Json<GeocodeResponse>, ApiError> {
    let point = checked_point(query.lat, query.lon)?;
    let cancel = state.shutdown_token();
    let place_name = state.geocoder().reverse(point, &cancel).await;
    Ok(Json(GeocodeResponse { place_name }))
}

/// `POST /api/share`
///
/// Returns `image/png` with the share message in [`CAPTION_HEADER`].
/// Without a subtitle the session center is reverse geocoded; without stats
/// the distance is the session path length.
pub async fn share_image(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ShareRequest>,
) -> Result<Response, ApiError> {
    let ShareRequest {
        points,
        mut options,
    } = request;
    for point in &points {
        checked_point(point.lat, point.lon)?;
    }

    let cancel = state.shutdown_token();

    if options.subtitle.is_none() {
        options.subtitle = match compute_bounds(&points) {
            Ok(bounds) => state.geocoder().reverse(bounds.center(), &cancel).await,
            Err(_) => None,
        };
    }
    if options.stats.is_none() && points.len() > 1 {
        options.stats = Some(TripStats {
            distance_m: Some(path_length_meters(&points)),
            speed_mps: None,
        });
    }

    match state.compositor().compose(&points, &options, &cancel).await? {
        ComposeOutcome::Image(image) => {
            let place = options
                .subtitle
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| coordinate_label(GeoPoint::new(image.camera.lat, image.camera.lon)));
            Ok(png_response(image.png, &share_caption(points.len(), &place)))
        }
        ComposeOutcome::Cancelled => Err(cancelled()),
    }
}

/// `GET /api/reports/owner/{owner_id}/{report_id}/share`
///
/// Square card for re-sharing one of the owner's recent reports. The
/// subtitle is the report's place name, or its coordinates when unknown.
pub async fn share_report(
    State(state): State<Arc<AppState>>,
    Path((owner_id, report_id)): Path<(String, ReportId)>,
) -> Result<Response, ApiError> {
    let owner_id = OwnerId::new(owner_id);
    let report = state
        .store()
        .query_recent_by_owner(&owner_id, OWNER_LIMIT)
        .await?
        .into_iter()
        .find(|r| r.id == report_id)
        .ok_or_else(|| {
            ApiError::NotFound(format!("report {report_id} among recent reports of {owner_id}"))
        })?;

    let cancel = state.shutdown_token();
    let place = state.geocoder().reverse(report.point(), &cancel).await;
    let options = ShareOptions::single_report(&report, place.as_deref());
    let caption = report_caption(options.subtitle.as_deref().unwrap_or_default());

    match state
        .compositor()
        .compose(&[report.point()], &options, &cancel)
        .await?
    {
        ComposeOutcome::Image(image) => Ok(png_response(image.png, &caption)),
        ComposeOutcome::Cancelled => Err(cancelled()),
    }
}

fn cancelled() -> ApiError {
    ApiError::Unavailable(String::from("share composition cancelled by shutdown"))
}

/// PNG body plus the caption header. Captions with control characters are
/// left off.
fn png_response(png: Vec<u8>, caption: &str) -> Response {
    let mut response = ([(header::CONTENT_TYPE, "image/png")], png).into_response();
    match HeaderValue::from_bytes(caption.as_bytes()) {
        Ok(value) => {
            response
                .headers_mut()
                .insert(HeaderName::from_static(CAPTION_HEADER), value);
        }
        Err(_) => tracing::debug!("Share caption is not a valid header value"),
    }
    response
}

/// Reject non-finite or out-of-range coordinates.
pub(crate) fn checked_point(lat: f64, lon: f64) -> Result<GeoPoint, ApiError> {
    let point = GeoPoint::new(lat, lon);
    if !point.is_finite() || !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(ApiError::InvalidRequest(format!(
            "coordinate out of range: lat {lat}, lon {lon}"
        )));
    }
    Ok(point)
}
