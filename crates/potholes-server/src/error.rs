//! Error types for the HTTP API.
//!
//! [`ApiError`] unifies all failure modes into a single enum that can be
//! converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use potholes_core::IngestError;
use potholes_db::DbError;
use potholes_share::ShareError;

/// Errors that can occur in the API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request was well-formed JSON but semantically invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The report store failed.
    #[error("store error: {0}")]
    Store(#[from] DbError),

    /// Share composition failed.
    #[error("share error: {0}")]
    Share(#[from] ShareError),

    /// The work was abandoned before it finished.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(msg) => Self::InvalidRequest(msg),
            IngestError::Store(e) => Self::Store(e),
        }
    }
}

impl ApiError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Share(ShareError::InvalidCanvas(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Share(
                ShareError::TileFetch { .. }
                | ShareError::TileTransport(_)
                | ShareError::TileDecode(_),
            ) => StatusCode::BAD_GATEWAY,
            Self::Store(_) | Self::Share(ShareError::Encode(_) | ShareError::Font(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
