//! Error types for the `potholes-geo` crate.

/// Errors raised by geometric helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GeoError {
    /// An operation that needs at least one point received none.
    ///
    /// Callers supply a default center instead of asking for bounds of an
    /// empty session.
    #[error("cannot compute bounds of an empty point set")]
    EmptyInput,
}
