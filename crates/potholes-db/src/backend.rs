//! Runtime-selected report repository.
//!
//! The server picks its store from configuration at startup. Rather than
//! boxing a trait object (the repository trait has `async` methods), the
//! choice is an enum that forwards each call to the active adapter.

use potholes_types::{NewReport, OwnerId, Report, ReportId};

use crate::error::DbError;
use crate::memory::InMemoryReportStore;
use crate::report_store::PostgresReportStore;
use crate::repository::{ChangeFilter, ChangeStream, ReportRepository};

/// The report store the process is running against.
#[derive(Clone)]
pub enum ReportBackend {
    /// Process-local store; contents are lost on restart.
    Memory(InMemoryReportStore),
    /// Durable `PostgreSQL` store.
    Postgres(PostgresReportStore),
}

impl ReportBackend {
    /// Short name of the active adapter, for logs and health output.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
        }
    }

    /// Number of change streams currently registered with the store.
    pub fn active_streams(&self) -> usize {
        match self {
            Self::Memory(store) => store.active_streams(),
            Self::Postgres(store) => store.active_streams(),
        }
    }
}

impl From<InMemoryReportStore> for ReportBackend {
    fn from(store: InMemoryReportStore) -> Self {
        Self::Memory(store)
    }
}

impl From<PostgresReportStore> for ReportBackend {
    fn from(store: PostgresReportStore) -> Self {
        Self::Postgres(store)
    }
}

impl ReportRepository for ReportBackend {
    async fn insert(&self, report: NewReport) -> Result<ReportId, DbError> {
        match self {
            Self::Memory(store) => store.insert(report).await,
            Self::Postgres(store) => store.insert(report).await,
        }
    }

    async fn insert_batch(&self, reports: Vec<NewReport>) -> Result<Vec<ReportId>, DbError> {
        match self {
            Self::Memory(store) => store.insert_batch(reports).await,
            Self::Postgres(store) => store.insert_batch(reports).await,
        }
    }

    async fn query_lat_range(&self, min_lat: f64, max_lat: f64) -> Result<Vec<Report>, DbError> {
        match self {
            Self::Memory(store) => store.query_lat_range(min_lat, max_lat).await,
            Self::Postgres(store) => store.query_lat_range(min_lat, max_lat).await,
        }
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<Report>, DbError> {
        match self {
            Self::Memory(store) => store.query_recent(limit).await,
            Self::Postgres(store) => store.query_recent(limit).await,
        }
    }

    async fn query_recent_by_owner(
        &self,
        owner_id: &OwnerId,
        limit: usize,
    ) -> Result<Vec<Report>, DbError> {
        match self {
            Self::Memory(store) => store.query_recent_by_owner(owner_id, limit).await,
            Self::Postgres(store) => store.query_recent_by_owner(owner_id, limit).await,
        }
    }

    async fn subscribe_changes(&self, filter: ChangeFilter) -> Result<ChangeStream, DbError> {
        match self {
            Self::Memory(store) => store.subscribe_changes(filter).await,
            Self::Postgres(store) => store.subscribe_changes(filter).await,
        }
    }
}
