//! `PostgreSQL`-backed report repository.
//!
//! Writes go to the `pothole_reports` table. An `AFTER INSERT` trigger
//! issues `NOTIFY pothole_reports` once per statement; a single
//! [`PgListener`] task per store forwards those notifications to a broadcast
//! channel, and every change stream re-runs its own query on notice. Open
//! streams therefore cost one channel receiver each, not one connection each.

use std::sync::Arc;

use potholes_types::{FullResultSet, NewReport, OwnerId, Report, ReportId};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::DbError;
use crate::postgres::PostgresPool;
use crate::repository::{
    ChangeFilter, ChangeNotice, ChangeStream, ReportRepository, notify_stream, sort_newest_first,
};

/// Channel the insert trigger notifies on.
pub const NOTIFY_CHANNEL: &str = "pothole_reports";

/// Rows per `UNNEST` insert statement.
const BATCH_CHUNK: usize = 500;

/// Capacity of the change-notice channel.
const NOTICE_CAPACITY: usize = 64;

/// Columns selected by every read.
const REPORT_COLUMNS: &str = "id, lat, lon, ts, owner_id, model, confidence, created_at";

/// Aborts the listener task when the last store clone goes away.
struct ListenerTask(JoinHandle<()>);

impl Drop for ListenerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Report repository backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresReportStore {
    pool: PgPool,
    notices: broadcast::Sender<ChangeNotice>,
    listener: Arc<ListenerTask>,
}

impl PostgresReportStore {
    /// Start listening for report changes and return the store.
    ///
    /// Migrations must already have run.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the listener cannot connect or
    /// subscribe to [`NOTIFY_CHANNEL`].
    pub async fn start(pool: &PostgresPool) -> Result<Self, DbError> {
        let mut listener = PgListener::connect_with(pool.pool()).await?;
        listener.listen(NOTIFY_CHANNEL).await?;

        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let task = tokio::spawn(forward_notifications(listener, notices.clone()));
        tracing::info!(channel = NOTIFY_CHANNEL, "Listening for report changes");

        Ok(Self {
            pool: pool.pool().clone(),
            notices,
            listener: Arc::new(ListenerTask(task)),
        })
    }

    /// Number of change streams currently registered.
    pub fn active_streams(&self) -> usize {
        self.notices.receiver_count()
    }

    async fn select(&self, filter: &ChangeFilter) -> Result<FullResultSet, DbError> {
        select(&self.pool, filter).await
    }
}

/// Forward every notification as a [`ChangeNotice`] until the listener fails.
async fn forward_notifications(mut listener: PgListener, notices: broadcast::Sender<ChangeNotice>) {
    loop {
        match listener.recv().await {
            Ok(notification) => {
                tracing::debug!(channel = notification.channel(), "Report change notification");
                let _ = notices.send(ChangeNotice::Changed);
            }
            Err(e) => {
                tracing::error!(error = %e, "Report change listener failed");
                let _ = notices.send(ChangeNotice::Failed(e.to_string()));
                return;
            }
        }
    }
}

/// Run a live-query filter against the table.
async fn select(pool: &PgPool, filter: &ChangeFilter) -> Result<FullResultSet, DbError> {
    let limit = i64::try_from(filter.limit()).unwrap_or(i64::MAX);
    let rows = match filter {
        ChangeFilter::Recent { .. } => {
            sqlx::query_as::<_, ReportRow>(&format!(
                "SELECT {REPORT_COLUMNS} FROM pothole_reports
                 ORDER BY ts DESC, id DESC
                 LIMIT $1"
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        ChangeFilter::Owner { owner_id, .. } => {
            sqlx::query_as::<_, ReportRow>(&format!(
                "SELECT {REPORT_COLUMNS} FROM pothole_reports
                 WHERE owner_id = $1
                 ORDER BY ts DESC, id DESC
                 LIMIT $2"
            ))
            .bind(owner_id.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    let mut reports = into_reports(rows);
    // The SQL already orders; this pins the id tie-break to the in-memory rule.
    sort_newest_first(&mut reports);
    Ok(FullResultSet::new(reports))
}

/// Convert rows, dropping any that break the finiteness invariant.
fn into_reports(rows: Vec<ReportRow>) -> Vec<Report> {
    rows.into_iter()
        .map(Report::from)
        .filter(|report| {
            let ok = report.is_well_formed();
            if !ok {
                tracing::warn!(id = %report.id, "Skipping stored report with non-finite coordinates");
            }
            ok
        })
        .collect()
}

impl ReportRepository for PostgresReportStore {
    async fn insert(&self, report: NewReport) -> Result<ReportId, DbError> {
        let id = ReportId::new();
        sqlx::query(
            r"INSERT INTO pothole_reports (id, lat, lon, ts, owner_id, model, confidence)
              VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id.into_inner())
        .bind(report.lat)
        .bind(report.lon)
        .bind(report.ts)
        .bind(report.owner_id.as_ref().map(OwnerId::as_str))
        .bind(report.model.as_deref())
        .bind(report.confidence)
        .execute(&self.pool)
        .await?;

        tracing::debug!(%id, "Inserted report");
        Ok(id)
    }

    async fn insert_batch(&self, reports: Vec<NewReport>) -> Result<Vec<ReportId>, DbError> {
        if reports.is_empty() {
            return Ok(Vec::new());
        }

        let mut assigned = Vec::with_capacity(reports.len());
        // One transaction for the whole batch: observers see a single change.
        let mut tx = self.pool.begin().await?;

        for chunk in reports.chunks(BATCH_CHUNK) {
            let len = chunk.len();
            let mut ids: Vec<Uuid> = Vec::with_capacity(len);
            let mut lats = Vec::with_capacity(len);
            let mut lons = Vec::with_capacity(len);
            let mut stamps = Vec::with_capacity(len);
            let mut owners: Vec<Option<String>> = Vec::with_capacity(len);
            let mut models: Vec<Option<String>> = Vec::with_capacity(len);
            let mut confidences: Vec<Option<f64>> = Vec::with_capacity(len);

            for report in chunk {
                let id = ReportId::new();
                assigned.push(id);
                ids.push(id.into_inner());
                lats.push(report.lat);
                lons.push(report.lon);
                stamps.push(report.ts);
                owners.push(report.owner_id.as_ref().map(|o| o.as_str().to_owned()));
                models.push(report.model.clone());
                confidences.push(report.confidence);
            }

            sqlx::query(
                r"INSERT INTO pothole_reports (id, lat, lon, ts, owner_id, model, confidence)
                  SELECT * FROM UNNEST($1::UUID[], $2::FLOAT8[], $3::FLOAT8[], $4::BIGINT[], $5::TEXT[], $6::TEXT[], $7::FLOAT8[])",
            )
            .bind(&ids)
            .bind(&lats)
            .bind(&lons)
            .bind(&stamps)
            .bind(&owners)
            .bind(&models)
            .bind(&confidences)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(count = assigned.len(), "Inserted report batch (UNNEST)");
        Ok(assigned)
    }

    async fn query_lat_range(&self, min_lat: f64, max_lat: f64) -> Result<Vec<Report>, DbError> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM pothole_reports
             WHERE lat >= $1 AND lat <= $2"
        ))
        .bind(min_lat)
        .bind(max_lat)
        .fetch_all(&self.pool)
        .await?;

        Ok(into_reports(rows))
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<Report>, DbError> {
        Ok(self
            .select(&ChangeFilter::Recent { limit })
            .await?
            .into_reports())
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
        Ok(self.select(&filter).await?.into_reports())
    }

    async fn subscribe_changes(&self, filter: ChangeFilter) -> Result<ChangeStream, DbError> {
        if self.listener.0.is_finished() {
            return Err(DbError::Stream(String::from(
                "report change listener is not running",
            )));
        }

        let pool = self.pool.clone();
        let query = move || {
            let pool = pool.clone();
            let filter = filter.clone();
            async move { select(&pool, &filter).await }
        };
        Ok(notify_stream(self.notices.subscribe(), query))
    }
}

/// A row from the `pothole_reports` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportRow {
    /// Report identifier.
    pub id: Uuid,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Detection time in epoch milliseconds.
    pub ts: i64,
    /// Reporting owner, if any.
    pub owner_id: Option<String>,
    /// Detector model name, if any.
    pub model: Option<String>,
    /// Detector confidence, if any.
    pub confidence: Option<f64>,
    /// Server-side insertion time.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ReportRow> for Report {
    fn from(row: ReportRow) -> Self {
        Self {
            id: ReportId::from(row.id),
            lat: row.lat,
            lon: row.lon,
            ts: row.ts,
            owner_id: row.owner_id.map(OwnerId::from),
            model: row.model,
            confidence: row.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn row(lat: f64) -> ReportRow {
        ReportRow {
            id: Uuid::now_v7(),
            lat,
            lon: 77.0,
            ts: 1,
            owner_id: Some(String::from("owner")),
            model: None,
            confidence: Some(0.5),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rows_convert_to_reports() {
        let source = row(12.0);
        let id = source.id;
        let report = Report::from(source);
        assert_eq!(report.id.into_inner(), id);
        assert_eq!(report.owner_id, Some(OwnerId::new("owner")));
    }

    #[test]
    fn non_finite_rows_are_dropped() {
        let reports = into_reports(vec![row(f64::NAN), row(12.0), row(f64::INFINITY)]);
        assert_eq!(reports.len(), 1);
    }
}
