//! `WebSocket` handlers for live report subscriptions.
//!
//! Each connection opens one subscription. Deliveries are pushed into a
//! [`watch`] channel and forwarded as JSON text frames. Every delivery is a
//! complete result set, so a client that reads slowly only misses sets that
//! were already superseded. A terminal `closed` frame is always the last value
//! in the channel and is never skipped.
//!
//! Dropping the connection drops the [`Subscription`](potholes_core::Subscription)
//! handle, which cancels it and releases its change stream.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use potholes_core::{Delivery, SubscriptionQuery};
use potholes_types::{OwnerId, Report};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::handlers::checked_point;
use crate::state::AppState;

/// Radius used when a nearby client does not send one.
pub const DEFAULT_RADIUS_M: f64 = 1_000.0;

/// Query string of `/ws/reports/nearby`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct NearbyQuery {
    /// Observer latitude.
    pub lat: f64,
    /// Observer longitude.
    pub lon: f64,
    /// Requested radius in meters.
    #[serde(default)]
    pub radius_m: Option<f64>,
}

/// One text frame sent to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsFrame<'a> {
    /// The complete current result set, newest first.
    Reports {
        /// Reports in the set.
        reports: &'a [Report],
    },
    /// The subscription failed; the socket closes after this frame.
    Closed {
        /// Description of the failure.
        error: &'a str,
    },
}

impl<'a> WsFrame<'a> {
    /// Frame for a delivery.
    pub fn from_delivery(delivery: &'a Delivery) -> Self {
        match delivery {
            Delivery::Update(set) => Self::Reports {
                reports: &set.reports,
            },
            Delivery::Closed { error } => Self::Closed { error },
        }
    }
}

/// `GET /ws/reports/nearby?lat=..&lon=..&radius_m=..`
pub async fn ws_nearby(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Response, ApiError> {
    let center = checked_point(query.lat, query.lon)?;
    let radius_m = query.radius_m.unwrap_or(DEFAULT_RADIUS_M);
    if !radius_m.is_finite() || radius_m < 0.0 {
        return Err(ApiError::InvalidRequest(format!(
            "invalid radius: {radius_m}"
        )));
    }
    let subscription = SubscriptionQuery::Nearby { center, radius_m };
    Ok(ws
        .on_upgrade(move |socket| handle_ws(socket, state, subscription))
        .into_response())
}

/// `GET /ws/reports/owner/{owner_id}`
pub async fn ws_owner(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
) -> impl IntoResponse {
    let subscription = SubscriptionQuery::ByOwner {
        owner_id: OwnerId::new(owner_id),
    };
    ws.on_upgrade(move |socket| handle_ws(socket, state, subscription))
}

/// Run one subscription for the lifetime of the socket.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, query: SubscriptionQuery) {
    debug!(?query, "WebSocket subscriber connected");

    let (tx, mut rx) = watch::channel(None::<Delivery>);
    let _subscription = state.subscriptions().subscribe(query, move |delivery| {
        tx.send_modify(|slot| *slot = Some(delivery));
    });

    loop {
        tokio::select! {
            // A new delivery, or the subscription task has exited.
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!("Subscription ended, closing WebSocket");
                    // Best effort: the peer may already be gone.
                    if socket.send(Message::Close(None)).await.is_err() {
                        debug!("WebSocket close frame not delivered");
                    }
                    return;
                }
                let delivery = rx.borrow_and_update().clone();
                let Some(delivery) = delivery else {
                    continue;
                };
                let json = match serde_json::to_string(&WsFrame::from_delivery(&delivery)) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("Failed to serialize subscription frame: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!("WebSocket client disconnected (send failed)");
                    return;
                }
                if matches!(delivery, Delivery::Closed { .. }) {
                    if socket.send(Message::Close(None)).await.is_err() {
                        debug!("WebSocket close frame not delivered");
                    }
                    return;
                }
            }
            // Check if the client sent a close frame or disconnected.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {
                        // Subscribers only listen.
                    }
                }
            }
        }
    }
}
