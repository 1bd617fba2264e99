//! Proximity deduplication in front of the report repository.
//!
//! A single submission is checked against every stored report in a narrow
//! latitude band around it; anything closer than [`DEDUP_RADIUS_M`] makes the
//! submission a duplicate. Batch submission skips that check entirely.
//!
//! The band is latitude-only, so longitude wraparound at the date line and
//! the convergence of meridians near the poles are not accounted for.
//!
//! Same-area submissions inside one process serialize on striped async
//! locks, so two concurrent submissions at the same spot cannot both see an
//! empty neighbourhood. The repository has no transactional check-and-insert,
//! so across processes the guarantee is best-effort.

use potholes_db::ReportRepository;
use potholes_geo::haversine_meters;
use potholes_types::{NewReport, ReportId};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use ts_rs::TS;
use validator::Validate;

use crate::error::IngestError;

/// Submissions closer than this to an existing report are duplicates.
pub const DEDUP_RADIUS_M: f64 = 10.0;

/// Half-height of the latitude band scanned for neighbours (about 11 m).
pub const LAT_BAND_DEG: f64 = 0.0001;

/// Height of one lock cell in degrees of latitude.
const AREA_CELL_DEG: f64 = 0.001;

/// Number of lock stripes shared by all cells.
const AREA_STRIPES: u32 = 64;

/// Result of a single submission.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(tag = "status", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SubmitOutcome {
    /// The report was stored.
    Accepted {
        /// Repository-assigned id.
        id: ReportId,
    },
    /// The report was not stored.
    Rejected {
        /// Why it was turned away.
        reason: RejectReason,
    },
}

impl SubmitOutcome {
    /// The stored id, if the submission was accepted.
    pub const fn accepted_id(&self) -> Option<ReportId> {
        match self {
            Self::Accepted { id } => Some(*id),
            Self::Rejected { .. } => None,
        }
    }
}

/// Why a submission was not stored.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum RejectReason {
    /// An existing report lies within [`DEDUP_RADIUS_M`].
    Duplicate {
        /// The report that was already there.
        existing_id: ReportId,
        /// Great-circle distance to it in meters.
        distance_m: f64,
    },
}

/// Check a report before it may touch storage.
///
/// Rejects non-finite coordinates, coordinates out of range, and a
/// confidence outside `[0, 1]`.
pub fn validate_report(report: &NewReport) -> Result<(), IngestError> {
    if !report.point().is_finite() {
        return Err(IngestError::Validation(format!(
            "coordinates must be finite, got ({}, {})",
            report.lat, report.lon
        )));
    }
    if report.confidence.is_some_and(|c| !c.is_finite()) {
        return Err(IngestError::Validation(String::from(
            "confidence must be finite",
        )));
    }
    report
        .validate()
        .map_err(|e| IngestError::Validation(e.to_string()))
}

/// Striped async locks keyed by latitude cell.
struct AreaLocks {
    stripes: Vec<Mutex<()>>,
}

impl AreaLocks {
    fn new() -> Self {
        Self {
            stripes: (0..AREA_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Stripe indices covering `lat +/- LAT_BAND_DEG`, ascending and unique.
    fn stripes_for(lat: f64) -> Vec<usize> {
        let low = stripe_of(lat - LAT_BAND_DEG);
        let high = stripe_of(lat + LAT_BAND_DEG);
        let mut stripes = vec![low, high];
        stripes.sort_unstable();
        stripes.dedup();
        stripes
    }

    /// Lock every stripe the band around `lat` touches.
    ///
    /// Stripes are always taken in ascending order so overlapping bands
    /// cannot deadlock.
    async fn lock(&self, lat: f64) -> Vec<MutexGuard<'_, ()>> {
        let mut guards = Vec::with_capacity(2);
        for index in Self::stripes_for(lat) {
            if let Some(stripe) = self.stripes.get(index) {
                guards.push(stripe.lock().await);
            }
        }
        guards
    }
}

/// Map a latitude onto its lock stripe.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn stripe_of(lat: f64) -> usize {
    let cell = (lat / AREA_CELL_DEG).floor();
    // rem_euclid keeps negative latitudes in [0, AREA_STRIPES).
    cell.rem_euclid(f64::from(AREA_STRIPES)) as usize
}

/// Dedup-checked entry point for new reports.
pub struct DedupGate<R> {
    repo: R,
    areas: AreaLocks,
}

impl<R: ReportRepository> DedupGate<R> {
    /// Wrap a repository.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            areas: AreaLocks::new(),
        }
    }

    /// The repository behind the gate.
    pub const fn repository(&self) -> &R {
        &self.repo
    }

    /// Validate, dedup-check and store one report.
    pub async fn submit(&self, report: NewReport) -> Result<SubmitOutcome, IngestError> {
        validate_report(&report)?;

        let candidate = report.point();
        let _area = self.areas.lock(candidate.lat).await;

        let neighbours = self
            .repo
            .query_lat_range(candidate.lat - LAT_BAND_DEG, candidate.lat + LAT_BAND_DEG)
            .await?;

        let nearest = neighbours
            .iter()
            .map(|existing| (existing.id, haversine_meters(candidate, existing.point())))
            .filter(|(_, distance)| *distance < DEDUP_RADIUS_M)
            .min_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((existing_id, distance_m)) = nearest {
            tracing::debug!(
                %existing_id,
                distance_m,
                lat = candidate.lat,
                lon = candidate.lon,
                "Rejected duplicate report"
            );
            return Ok(SubmitOutcome::Rejected {
                reason: RejectReason::Duplicate {
                    existing_id,
                    distance_m,
                },
            });
        }

        let id = self.repo.insert(report).await?;
        tracing::debug!(%id, lat = candidate.lat, lon = candidate.lon, "Accepted report");
        Ok(SubmitOutcome::Accepted { id })
    }

    /// Store many reports without any duplicate check.
    ///
    /// The batch is validated as a whole: one malformed report fails the
    /// call before anything is written. Ids come back in input order.
    pub async fn submit_batch(&self, reports: Vec<NewReport>) -> Result<Vec<ReportId>, IngestError> {
        for (index, report) in reports.iter().enumerate() {
            validate_report(report).map_err(|e| match e {
                IngestError::Validation(msg) => {
                    IngestError::Validation(format!("report {index}: {msg}"))
                }
                other @ IngestError::Store(_) => other,
            })?;
        }

        let count = reports.len();
        let ids = self.repo.insert_batch(reports).await?;
        tracing::info!(count, "Stored report batch");
        Ok(ids)
    }
}
