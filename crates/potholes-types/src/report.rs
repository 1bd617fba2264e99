//! Report and coordinate types shared by the store, the ingest gate and the
//! share compositor.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use validator::Validate;

use crate::ids::{OwnerId, ReportId};

/// A WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GeoPoint {
    /// Latitude in degrees, `[-90, 90]`.
    pub lat: f64,
    /// Longitude in degrees, `[-180, 180]`.
    pub lon: f64,
}

impl GeoPoint {
    /// Create a point from latitude and longitude in degrees.
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether both components are finite numbers.
    pub const fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// One element of a recorded trip. Path order is the slice order.
pub type TripPoint = GeoPoint;

/// Caller-supplied payload for a new report.
///
/// Carries everything a [`Report`] does except the identifier, which only
/// the repository assigns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NewReport {
    /// Latitude in degrees.
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    /// Longitude in degrees.
    #[validate(range(min = -180.0, max = 180.0))]
    pub lon: f64,
    /// Detection time in epoch milliseconds.
    pub ts: i64,
    /// Reporting user or anonymous session.
    #[serde(default, alias = "uid", skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub owner_id: Option<OwnerId>,
    /// Name of the detector model that produced the report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub model: Option<String>,
    /// Detector confidence in `[0, 1]`.
    #[serde(default, alias = "conf", skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    #[ts(optional)]
    pub confidence: Option<f64>,
}

impl NewReport {
    /// A bare report at `point` observed at `ts`.
    pub const fn at(point: GeoPoint, ts: i64) -> Self {
        Self {
            lat: point.lat,
            lon: point.lon,
            ts,
            owner_id: None,
            model: None,
            confidence: None,
        }
    }

    /// Attach an owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<OwnerId>) -> Self {
        self.owner_id = Some(owner.into());
        self
    }

    /// Attach detector metadata.
    #[must_use]
    pub fn with_detection(mut self, model: impl Into<String>, confidence: f64) -> Self {
        self.model = Some(model.into());
        self.confidence = Some(confidence);
        self
    }

    /// The report's coordinate.
    pub const fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    /// Attach the repository-assigned id, producing the persisted form.
    pub fn into_report(self, id: ReportId) -> Report {
        Report {
            id,
            lat: self.lat,
            lon: self.lon,
            ts: self.ts,
            owner_id: self.owner_id,
            model: self.model,
            confidence: self.confidence,
        }
    }
}

/// A persisted pothole report. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Report {
    /// Repository-assigned identifier.
    pub id: ReportId,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Detection time in epoch milliseconds.
    pub ts: i64,
    /// Reporting user or anonymous session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub owner_id: Option<OwnerId>,
    /// Detector model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub model: Option<String>,
    /// Detector confidence in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub confidence: Option<f64>,
}

impl Report {
    /// The report's coordinate.
    pub const fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    /// Whether the stored coordinates satisfy the finiteness invariant.
    ///
    /// Rows failing this are never handed to observers.
    pub const fn is_well_formed(&self) -> bool {
        self.point().is_finite()
    }
}

/// The complete current result set of a live query.
///
/// Every change-stream emission and every subscription delivery carries one
/// of these. It always replaces whatever the consumer held before; it is
/// never a delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct FullResultSet {
    /// Reports ordered by timestamp, newest first.
    pub reports: Vec<Report>,
}

impl FullResultSet {
    /// Wrap an already ordered report list.
    pub const fn new(reports: Vec<Report>) -> Self {
        Self { reports }
    }

    /// Number of reports in the set.
    pub const fn len(&self) -> usize {
        self.reports.len()
    }

    /// Whether the set is empty.
    pub const fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Iterate over the reports, newest first.
    pub fn iter(&self) -> core::slice::Iter<'_, Report> {
        self.reports.iter()
    }

    /// Take ownership of the report list.
    pub fn into_reports(self) -> Vec<Report> {
        self.reports
    }
}

impl<'a> IntoIterator for &'a FullResultSet {
    type Item = &'a Report;
    type IntoIter = core::slice::Iter<'a, Report>;

    fn into_iter(self) -> Self::IntoIter {
        self.reports.iter()
    }
}
