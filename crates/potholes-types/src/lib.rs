//! Shared type definitions for the Potholes Live report store.
//!
//! This crate is the single source of truth for the wire and domain types
//! used across the workspace. Types flow downstream to `TypeScript` via
//! `ts-rs` for the map client.
//!
//! # Modules
//!
//! - [`ids`] -- Report and owner identifiers
//! - [`report`] -- Reports, coordinates and full result sets

pub mod ids;
pub mod report;

// Re-export all public types at crate root for convenience.
pub use ids::{OwnerId, ReportId};
pub use report::{FullResultSet, GeoPoint, NewReport, Report, TripPoint};
