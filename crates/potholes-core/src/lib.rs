//! Ingest and live-query logic for the Potholes Live report store.
//!
//! Sits between the service shell and the report repository:
//!
//! - [`dedup`] -- validation and proximity deduplication of new reports
//! - [`subscription`] -- live nearby and by-owner subscriptions
//! - [`error`] -- ingest error types

pub mod dedup;
pub mod error;
pub mod subscription;

pub use dedup::{DEDUP_RADIUS_M, DedupGate, LAT_BAND_DEG, RejectReason, SubmitOutcome, validate_report};
pub use error::IngestError;
pub use subscription::{
    Delivery, NEARBY_LIMIT, OWNER_LIMIT, Subscription, SubscriptionManager, SubscriptionQuery,
};
