//! The report repository contract.
//!
//! A repository stores immutable [`Report`]s and answers three kinds of
//! question: a coarse latitude band (for duplicate detection), recency-ordered
//! slices (optionally by owner), and live queries. A live query is a
//! [`ChangeStream`] whose every item is the complete current result set.
//! Consumers never receive partial patches.
//!
//! Both adapters share [`notify_stream`]: the store broadcasts a bare
//! [`ChangeNotice`] on every write and each open stream re-runs its own query.

use std::future::Future;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use potholes_types::{FullResultSet, NewReport, OwnerId, Report, ReportId};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::DbError;

/// A live query: the current set first, then one full set per change.
///
/// An `Err` item is terminal; the stream ends right after it.
pub type ChangeStream = BoxStream<'static, Result<FullResultSet, DbError>>;

/// Which reports a live query tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFilter {
    /// The most recent `limit` reports from anyone.
    Recent {
        /// Maximum reports per emission.
        limit: usize,
    },
    /// The most recent `limit` reports of one owner.
    Owner {
        /// Owner to match.
        owner_id: OwnerId,
        /// Maximum reports per emission.
        limit: usize,
    },
}

impl ChangeFilter {
    /// Maximum reports per emission.
    pub const fn limit(&self) -> usize {
        match self {
            Self::Recent { limit } | Self::Owner { limit, .. } => *limit,
        }
    }

    /// Whether `report` belongs to this query, ignoring the limit.
    pub fn matches(&self, report: &Report) -> bool {
        match self {
            Self::Recent { .. } => true,
            Self::Owner { owner_id, .. } => report.owner_id.as_ref() == Some(owner_id),
        }
    }
}

/// Durable storage for pothole reports.
///
/// Implementations must be cheap to share between tasks. Every query
/// returns only well-formed reports (finite coordinates).
pub trait ReportRepository: Send + Sync {
    /// Persist one report and return its newly assigned id.
    fn insert(&self, report: NewReport) -> impl Future<Output = Result<ReportId, DbError>> + Send;

    /// Persist many reports at once; ids are returned in input order.
    ///
    /// Live queries observe the batch as a single change.
    fn insert_batch(
        &self,
        reports: Vec<NewReport>,
    ) -> impl Future<Output = Result<Vec<ReportId>, DbError>> + Send;

    /// All reports with `min_lat <= lat <= max_lat`, in no particular order.
    fn query_lat_range(
        &self,
        min_lat: f64,
        max_lat: f64,
    ) -> impl Future<Output = Result<Vec<Report>, DbError>> + Send;

    /// The `limit` most recent reports, newest first.
    fn query_recent(&self, limit: usize)
    -> impl Future<Output = Result<Vec<Report>, DbError>> + Send;

    /// The `limit` most recent reports of `owner_id`, newest first.
    fn query_recent_by_owner(
        &self,
        owner_id: &OwnerId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Report>, DbError>> + Send;

    /// Open a live query.
    ///
    /// Each call registers its own stream; dropping the stream releases the
    /// registration without affecting other streams.
    fn subscribe_changes(
        &self,
        filter: ChangeFilter,
    ) -> impl Future<Output = Result<ChangeStream, DbError>> + Send;
}

/// Change notification fanned out from a store to its open streams.
#[derive(Debug, Clone)]
pub(crate) enum ChangeNotice {
    /// Something was written; re-read.
    Changed,
    /// The upstream notification source died.
    Failed(String),
}

/// Order reports newest first, breaking timestamp ties by id.
pub(crate) fn sort_newest_first(reports: &mut [Report]) {
    reports.sort_by(|a, b| b.ts.cmp(&a.ts).then_with(|| b.id.cmp(&a.id)));
}

/// Build a [`ChangeStream`] that emits `query()` once immediately and again
/// after every notice.
///
/// A lagged receiver collapses the missed notices into one re-read, which is
/// sound because every emission is a full result set.
pub(crate) fn notify_stream<Q, Fut>(
    notices: broadcast::Receiver<ChangeNotice>,
    query: Q,
) -> ChangeStream
where
    Q: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<FullResultSet, DbError>> + Send + 'static,
{
    struct Cursor<Q> {
        notices: broadcast::Receiver<ChangeNotice>,
        query: Q,
        primed: bool,
    }

    let start = Some(Cursor {
        notices,
        query,
        primed: false,
    });

    stream::unfold(start, |cursor| async move {
        let Some(mut cursor) = cursor else {
            return None;
        };

        if cursor.primed {
            loop {
                match cursor.notices.recv().await {
                    Ok(ChangeNotice::Changed) => break,
                    Ok(ChangeNotice::Failed(reason)) => {
                        return Some((Err(DbError::Stream(reason)), None));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Change stream lagged, re-reading once");
                        break;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
        cursor.primed = true;

        match (cursor.query)().await {
            Ok(set) => Some((Ok(set), Some(cursor))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}
