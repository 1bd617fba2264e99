//! Report storage for Potholes Live.
//!
//! Provides the [`ReportRepository`] contract and two adapters:
//!
//! - [`InMemoryReportStore`] for offline use and tests
//! - [`PostgresReportStore`] for durable storage, with live queries driven by
//!   `LISTEN/NOTIFY`
//!
//! [`ReportBackend`] selects between them at runtime.
//!
//! # Modules
//!
//! - [`repository`] -- The repository trait and change streams
//! - [`memory`] -- In-memory adapter
//! - [`postgres`] -- Connection pool and migrations
//! - [`report_store`] -- `PostgreSQL` adapter
//! - [`backend`] -- Runtime adapter selection
//! - [`error`] -- Error types

pub mod backend;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod report_store;
pub mod repository;

pub use backend::ReportBackend;
pub use error::DbError;
pub use memory::InMemoryReportStore;
pub use postgres::{MIN_POOL_SIZE, PostgresConfig, PostgresPool};
pub use report_store::{NOTIFY_CHANNEL, PostgresReportStore};
pub use repository::{ChangeFilter, ChangeStream, ReportRepository};
