//! Live report subscriptions.
//!
//! Each subscription runs as one spawned task that owns exactly one change
//! stream on the repository. Every emission of that stream is forwarded to
//! the observer as a complete [`FullResultSet`]; observers never receive
//! patches and reconcile by report id themselves.
//!
//! Nearby subscriptions are a recency cap, not a spatial query: the center
//! and radius are recorded and logged, but every recent report is delivered
//! regardless of distance. This is the live behavior clients currently rely
//! on; it is kept deliberately.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use potholes_db::{ChangeFilter, ReportRepository};
use potholes_types::{FullResultSet, GeoPoint, OwnerId};
use tokio_util::sync::CancellationToken;

/// Reports per delivery for nearby subscriptions.
pub const NEARBY_LIMIT: usize = 5_000;

/// Reports per delivery for owner subscriptions.
pub const OWNER_LIMIT: usize = 50;

/// What a subscription tracks.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionQuery {
    /// Recent reports, nominally around `center`.
    Nearby {
        /// Observer position.
        center: GeoPoint,
        /// Requested radius in meters. Not applied to results.
        radius_m: f64,
    },
    /// Recent reports of one owner.
    ByOwner {
        /// Owner to follow.
        owner_id: OwnerId,
    },
}

impl SubscriptionQuery {
    /// Maximum reports per delivery.
    pub const fn limit(&self) -> usize {
        match self {
            Self::Nearby { .. } => NEARBY_LIMIT,
            Self::ByOwner { .. } => OWNER_LIMIT,
        }
    }

    /// The repository live query backing this subscription.
    pub fn change_filter(&self) -> ChangeFilter {
        match self {
            // No spatial predicate: nearby is recency only.
            Self::Nearby { .. } => ChangeFilter::Recent {
                limit: NEARBY_LIMIT,
            },
            Self::ByOwner { owner_id } => ChangeFilter::Owner {
                owner_id: owner_id.clone(),
                limit: OWNER_LIMIT,
            },
        }
    }
}

/// One message to a subscription's observer.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The complete current result set. Replaces anything delivered before.
    Update(FullResultSet),
    /// The change stream failed. Terminal: nothing follows.
    Closed {
        /// Description of the failure.
        error: String,
    },
}

/// Handle to a running subscription.
///
/// Dropping the handle cancels the subscription.
#[derive(Debug)]
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl Subscription {
    /// Stop deliveries and release the change stream.
    ///
    /// Idempotent, and a no-op once the subscription has closed on its own.
    /// A delivery already in progress runs to completion; none starts after
    /// the task observes the cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the subscription task has exited.
    pub fn is_closed(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Wait until the subscription task has exited and released its stream.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Decrements the live-subscription count when a task exits.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(count))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Opens and tracks live subscriptions against a repository.
pub struct SubscriptionManager<R> {
    repo: R,
    root: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl<R> SubscriptionManager<R>
where
    R: ReportRepository + Clone + 'static,
{
    /// Create a manager over `repo`.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            root: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Follow recent reports around `center`.
    ///
    /// Delivers up to [`NEARBY_LIMIT`] reports, newest first. `radius_m` is
    /// not applied: distant reports are delivered too.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe_nearby<F>(&self, center: GeoPoint, radius_m: f64, on_update: F) -> Subscription
    where
        F: FnMut(Delivery) + Send + 'static,
    {
        self.subscribe(SubscriptionQuery::Nearby { center, radius_m }, on_update)
    }

    /// Follow the [`OWNER_LIMIT`] most recent reports of `owner_id`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe_by_owner<F>(&self, owner_id: OwnerId, on_update: F) -> Subscription
    where
        F: FnMut(Delivery) + Send + 'static,
    {
        self.subscribe(SubscriptionQuery::ByOwner { owner_id }, on_update)
    }

    /// Open a subscription for an arbitrary query.
    pub fn subscribe<F>(&self, query: SubscriptionQuery, on_update: F) -> Subscription
    where
        F: FnMut(Delivery) + Send + 'static,
    {
        let cancel = self.root.child_token();
        let finished = CancellationToken::new();

        match &query {
            SubscriptionQuery::Nearby { center, radius_m } => tracing::debug!(
                lat = center.lat,
                lon = center.lon,
                radius_m,
                limit = NEARBY_LIMIT,
                "Opening nearby subscription (recency cap, radius not applied)"
            ),
            SubscriptionQuery::ByOwner { owner_id } => tracing::debug!(
                %owner_id,
                limit = OWNER_LIMIT,
                "Opening owner subscription"
            ),
        }

        let active = ActiveGuard::enter(&self.active);
        let task_cancel = cancel.clone();
        let done = finished.clone().drop_guard();
        let repo = self.repo.clone();
        tokio::spawn(async move {
            // Locals drop in reverse: the count is released before `closed()` wakes.
            let _done = done;
            let _active = active;
            run_subscription(repo, query, task_cancel, on_update).await;
        });

        Subscription { cancel, finished }
    }

    /// Number of subscription tasks still running.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Cancel every subscription, including ones opened after this call.
    pub fn shutdown(&self) {
        tracing::info!(
            active = self.active_subscriptions(),
            "Shutting down subscriptions"
        );
        self.root.cancel();
    }
}

/// Drive one subscription until cancellation, stream failure or stream end.
async fn run_subscription<R, F>(
    repo: R,
    query: SubscriptionQuery,
    cancel: CancellationToken,
    mut on_update: F,
) where
    R: ReportRepository,
    F: FnMut(Delivery) + Send,
{
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        opened = repo.subscribe_changes(query.change_filter()) => opened,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to open change stream");
            if !cancel.is_cancelled() {
                on_update(Delivery::Closed {
                    error: e.to_string(),
                });
            }
            return;
        }
    };

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = stream.next() => item,
        };

        if cancel.is_cancelled() {
            break;
        }

        match item {
            Some(Ok(set)) => {
                tracing::trace!(count = set.len(), "Delivering result set");
                on_update(Delivery::Update(set));
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Change stream failed, closing subscription");
                on_update(Delivery::Closed {
                    error: e.to_string(),
                });
                break;
            }
            None => {
                tracing::debug!("Change stream ended, closing subscription");
                on_update(Delivery::Closed {
                    error: String::from("change stream ended"),
                });
                break;
            }
        }
    }

    tracing::debug!("Subscription closed");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::channel::mpsc;
    use potholes_db::{ChangeStream, DbError, InMemoryReportStore};
    use potholes_types::{NewReport, Report, ReportId};
    use tokio::sync::mpsc as tokio_mpsc;

    use super::*;

    /// Repository whose single change stream is fed by the test.
    #[derive(Clone)]
    struct ScriptedRepo {
        stream: Arc<Mutex<Option<mpsc::UnboundedReceiver<Result<FullResultSet, DbError>>>>>,
    }

    impl ScriptedRepo {
        fn new() -> (Self, mpsc::UnboundedSender<Result<FullResultSet, DbError>>) {
            let (tx, rx) = mpsc::unbounded();
            let repo = Self {
                stream: Arc::new(Mutex::new(Some(rx))),
            };
            (repo, tx)
        }
    }

    impl ReportRepository for ScriptedRepo {
        async fn insert(&self, _report: NewReport) -> Result<ReportId, DbError> {
            Ok(ReportId::new())
        }

        async fn insert_batch(&self, _reports: Vec<NewReport>) -> Result<Vec<ReportId>, DbError> {
            Ok(Vec::new())
        }

        async fn query_lat_range(&self, _min: f64, _max: f64) -> Result<Vec<Report>, DbError> {
            Ok(Vec::new())
        }

        async fn query_recent(&self, _limit: usize) -> Result<Vec<Report>, DbError> {
            Ok(Vec::new())
        }

        async fn query_recent_by_owner(
            &self,
            _owner_id: &OwnerId,
            _limit: usize,
        ) -> Result<Vec<Report>, DbError> {
            Ok(Vec::new())
        }

        async fn subscribe_changes(&self, _filter: ChangeFilter) -> Result<ChangeStream, DbError> {
            let rx = self.stream.lock().unwrap().take();
            rx.map(|rx| rx.boxed())
                .ok_or_else(|| DbError::Stream(String::from("already subscribed")))
        }
    }

    fn collector() -> (
        impl FnMut(Delivery) + Send + 'static,
        tokio_mpsc::UnboundedReceiver<Delivery>,
    ) {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        (
            move |delivery| {
                let _ = tx.send(delivery);
            },
            rx,
        )
    }

    async fn next(rx: &mut tokio_mpsc::UnboundedReceiver<Delivery>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn nothing_more(rx: &mut tokio_mpsc::UnboundedReceiver<Delivery>) {
        let waited = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(waited, Err(_) | Ok(None)));
    }

    fn updated(delivery: Delivery) -> FullResultSet {
        assert!(
            matches!(delivery, Delivery::Update(_)),
            "unexpected delivery: {delivery:?}"
        );
        match delivery {
            Delivery::Update(set) => set,
            Delivery::Closed { .. } => FullResultSet::default(),
        }
    }

    fn report(ts: i64) -> Report {
        NewReport::at(GeoPoint::new(1.0, 1.0), ts).into_report(ReportId::new())
    }

    #[tokio::test]
    async fn nearby_delivers_recency_cap_regardless_of_center() {
        let store = InMemoryReportStore::new();
        let batch: Vec<NewReport> = (0..6_000_i32)
            .map(|i| {
                // Spread across the globe: distance must not matter.
                let lat = f64::from(i % 170) - 85.0;
                NewReport::at(GeoPoint::new(lat, 10.0), i64::from(i))
            })
            .collect();
        store.insert_batch(batch).await.unwrap();

        let manager = SubscriptionManager::new(store);
        let (on_update, mut rx) = collector();
        // Tiny radius far from every report.
        let _sub = manager.subscribe_nearby(GeoPoint::new(0.0, -170.0), 1.0, on_update);

        let set = updated(next(&mut rx).await);
        assert_eq!(set.len(), NEARBY_LIMIT);
        assert_eq!(set.reports[0].ts, 5_999);
        assert!(set.reports.windows(2).all(|w| w[0].ts >= w[1].ts));
    }

    #[tokio::test]
    async fn owner_subscription_is_filtered_capped_and_ordered() {
        let store = InMemoryReportStore::new();
        let mut batch = Vec::new();
        for ts in 0..80 {
            batch.push(NewReport::at(GeoPoint::new(1.0, 1.0), ts).with_owner("alice"));
            batch.push(NewReport::at(GeoPoint::new(1.0, 1.0), ts).with_owner("bob"));
        }
        store.insert_batch(batch).await.unwrap();

        let manager = SubscriptionManager::new(store.clone());
        let (on_update, mut rx) = collector();
        let _sub = manager.subscribe_by_owner(OwnerId::new("alice"), on_update);

        let set = updated(next(&mut rx).await);
        assert_eq!(set.len(), OWNER_LIMIT);
        assert!(set.iter().all(|r| r.owner_id == Some(OwnerId::new("alice"))));
        assert!(set.reports.windows(2).all(|w| w[0].ts >= w[1].ts));
        assert_eq!(set.reports[0].ts, 79);

        store
            .insert(NewReport::at(GeoPoint::new(1.0, 1.0), 500).with_owner("alice"))
            .await
            .unwrap();
        let set = updated(next(&mut rx).await);
        assert_eq!(set.len(), OWNER_LIMIT);
        assert_eq!(set.reports[0].ts, 500);
    }

    #[tokio::test]
    async fn one_delivery_per_stream_emission() {
        let (repo, feed) = ScriptedRepo::new();
        let manager = SubscriptionManager::new(repo);
        let (on_update, mut rx) = collector();
        let _sub = manager.subscribe_by_owner(OwnerId::new("a"), on_update);

        for n in 1..=3 {
            let reports = (0..n).map(report).collect();
            feed.unbounded_send(Ok(FullResultSet::new(reports))).unwrap();
        }

        for expected in 1..=3 {
            assert_eq!(updated(next(&mut rx).await).len(), expected);
        }
        nothing_more(&mut rx).await;
    }

    #[tokio::test]
    async fn stream_error_is_delivered_once_and_closes() {
        let (repo, feed) = ScriptedRepo::new();
        let manager = SubscriptionManager::new(repo);
        let (on_update, mut rx) = collector();
        let sub = manager.subscribe_by_owner(OwnerId::new("a"), on_update);

        feed.unbounded_send(Err(DbError::Stream(String::from("listener died"))))
            .unwrap();
        let delivery = next(&mut rx).await;
        assert!(matches!(delivery, Delivery::Closed { error } if error.contains("listener died")));

        sub.closed().await;
        assert!(sub.is_closed());
        // No-op after close.
        sub.cancel();
        let _ = feed.unbounded_send(Ok(FullResultSet::default()));
        nothing_more(&mut rx).await;
        assert_eq!(manager.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn cancel_twice_stops_deliveries() {
        let store = InMemoryReportStore::new();
        let manager = SubscriptionManager::new(store.clone());
        let (on_update, mut rx) = collector();
        let sub = manager.subscribe_nearby(GeoPoint::new(0.0, 0.0), 500.0, on_update);
        assert!(updated(next(&mut rx).await).is_empty());

        sub.cancel();
        sub.cancel();
        sub.closed().await;

        store
            .insert(NewReport::at(GeoPoint::new(0.0, 0.0), 1))
            .await
            .unwrap();
        nothing_more(&mut rx).await;
        assert_eq!(store.active_streams(), 0);
    }

    #[tokio::test]
    async fn cancelling_one_leaves_others_running() {
        let store = InMemoryReportStore::new();
        let manager = SubscriptionManager::new(store.clone());
        let (first_cb, mut first_rx) = collector();
        let (second_cb, mut second_rx) = collector();
        let first = manager.subscribe_nearby(GeoPoint::new(0.0, 0.0), 10.0, first_cb);
        let _second = manager.subscribe_nearby(GeoPoint::new(0.0, 0.0), 10.0, second_cb);
        next(&mut first_rx).await;
        next(&mut second_rx).await;

        first.cancel();
        first.closed().await;
        assert_eq!(manager.active_subscriptions(), 1);

        store
            .insert(NewReport::at(GeoPoint::new(0.0, 0.0), 1))
            .await
            .unwrap();
        assert_eq!(updated(next(&mut second_rx).await).len(), 1);
        nothing_more(&mut first_rx).await;
    }

    #[tokio::test]
    async fn repeated_subscribe_cancel_releases_streams() {
        let store = InMemoryReportStore::new();
        let manager = SubscriptionManager::new(store.clone());

        for _ in 0..50 {
            let (on_update, _rx) = collector();
            let sub = manager.subscribe_by_owner(OwnerId::new("x"), on_update);
            drop(sub);
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.active_subscriptions() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(store.active_streams(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_everything() {
        let store = InMemoryReportStore::new();
        let manager = SubscriptionManager::new(store.clone());
        let (a, _a_rx) = collector();
        let (b, _b_rx) = collector();
        let first = manager.subscribe_by_owner(OwnerId::new("a"), a);
        let second = manager.subscribe_nearby(GeoPoint::new(0.0, 0.0), 1.0, b);

        manager.shutdown();
        first.closed().await;
        second.closed().await;
        assert_eq!(manager.active_subscriptions(), 0);
        assert_eq!(store.active_streams(), 0);
    }

    #[test]
    fn nearby_query_has_no_spatial_filter() {
        let query = SubscriptionQuery::Nearby {
            center: GeoPoint::new(12.0, 77.0),
            radius_m: 15_000.0,
        };
        assert_eq!(
            query.change_filter(),
            ChangeFilter::Recent {
                limit: NEARBY_LIMIT
            }
        );
        assert_eq!(query.limit(), NEARBY_LIMIT);
    }
}
