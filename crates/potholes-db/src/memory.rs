//! In-memory report store for development, offline mode and tests.
//!
//! Reports live in a `Vec` behind an async [`RwLock`]. Every write
//! broadcasts one [`ChangeNotice`]; each open change stream holds its own
//! receiver and re-reads its query on notice.

use std::sync::Arc;

use potholes_types::{FullResultSet, NewReport, OwnerId, Report, ReportId};
use tokio::sync::{RwLock, broadcast};

use crate::error::DbError;
use crate::repository::{
    ChangeFilter, ChangeNotice, ChangeStream, ReportRepository, notify_stream, sort_newest_first,
};

/// Capacity of the change-notice channel.
///
/// A stream that falls further behind than this collapses the backlog into
/// one re-read.
const NOTICE_CAPACITY: usize = 64;

/// Report store held entirely in process memory.
#[derive(Clone)]
pub struct InMemoryReportStore {
    reports: Arc<RwLock<Vec<Report>>>,
    notices: broadcast::Sender<ChangeNotice>,
}

impl InMemoryReportStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            reports: Arc::new(RwLock::new(Vec::new())),
            notices,
        }
    }

    /// Number of stored reports.
    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }

    /// Whether the store holds no reports.
    pub async fn is_empty(&self) -> bool {
        self.reports.read().await.is_empty()
    }

    /// Number of change streams currently registered.
    pub fn active_streams(&self) -> usize {
        self.notices.receiver_count()
    }

    fn notify(&self) {
        // Err only means nobody is listening.
        let _ = self.notices.send(ChangeNotice::Changed);
    }
}

impl Default for InMemoryReportStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate `filter` against a snapshot of the store.
fn select(reports: &[Report], filter: &ChangeFilter) -> FullResultSet {
    let mut matching: Vec<Report> = reports
        .iter()
        .filter(|r| r.is_well_formed() && filter.matches(r))
        .cloned()
        .collect();
    sort_newest_first(&mut matching);
    matching.truncate(filter.limit());
    FullResultSet::new(matching)
}

impl ReportRepository for InMemoryReportStore {
    async fn insert(&self, report: NewReport) -> Result<ReportId, DbError> {
        let id = ReportId::new();
        self.reports.write().await.push(report.into_report(id));
        self.notify();
        Ok(id)
    }

    async fn insert_batch(&self, reports: Vec<NewReport>) -> Result<Vec<ReportId>, DbError> {
        if reports.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(reports.len());
        {
            let mut stored = self.reports.write().await;
            for report in reports {
                let id = ReportId::new();
                stored.push(report.into_report(id));
                ids.push(id);
            }
        }
        self.notify();
        Ok(ids)
    }

    async fn query_lat_range(&self, min_lat: f64, max_lat: f64) -> Result<Vec<Report>, DbError> {
        let stored = self.reports.read().await;
        Ok(stored
            .iter()
            .filter(|r| r.is_well_formed() && r.lat >= min_lat && r.lat <= max_lat)
            .cloned()
            .collect())
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<Report>, DbError> {
        let stored = self.reports.read().await;
        Ok(select(&stored, &ChangeFilter::Recent { limit }).into_reports())
    }

    async fn query_recent_by_owner(
        &self,
        owner_id: &OwnerId,
        limit: usize,
    ) -> Result<Vec<Report>, DbError> {
        let filter = ChangeFilter::Owner {
            owner_id: owner_id.clone(),
            limit,
        };
        let stored = self.reports.read().await;
        Ok(select(&stored, &filter).into_reports())
    }

    async fn subscribe_changes(&self, filter: ChangeFilter) -> Result<ChangeStream, DbError> {
        let reports = Arc::clone(&self.reports);
        let query = move || {
            let reports = Arc::clone(&reports);
            let filter = filter.clone();
            async move { Ok(select(&reports.read().await, &filter)) }
        };
        Ok(notify_stream(self.notices.subscribe(), query))
    }
}
