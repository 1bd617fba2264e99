//! Error types for report ingestion.

use potholes_db::DbError;

/// Errors that fail a submission outright.
///
/// A duplicate is not an error: it is reported as
/// [`SubmitOutcome::Rejected`](crate::dedup::SubmitOutcome::Rejected).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The report is malformed; storage was not touched.
    #[error("invalid report: {0}")]
    Validation(String),

    /// The repository failed while checking or storing the report.
    #[error("report store error: {0}")]
    Store(#[from] DbError),
}
