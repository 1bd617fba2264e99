//! Identifier types for reports and their owners.
//!
//! Report identifiers are assigned by the repository at persistence time and
//! use UUID v7 (time-ordered) so they index well and sort roughly by
//! insertion. Owner identifiers come from the identity subsystem and are
//! treated as opaque, unvalidated strings.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Repository-assigned identifier of a persisted report.
///
/// Never supplied by the caller: the store mints one (UUID v7) when the
/// report is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct ReportId(pub Uuid);

impl ReportId {
    /// Mint a fresh time-ordered identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying [`Uuid`].
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ReportId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for ReportId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Opaque owner identifier supplied by the identity subsystem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct OwnerId(pub String);

impl OwnerId {
    /// Wrap a raw owner string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw owner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for OwnerId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
