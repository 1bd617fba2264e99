//! Error types for share image composition.

/// Errors that can occur while composing a share image.
///
/// Cancellation is not an error; it is reported as
/// [`ComposeOutcome::Cancelled`](crate::compositor::ComposeOutcome::Cancelled).
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    /// The tile service answered with a non-success status. Not retried.
    #[error("tile fetch failed with status {status}: {body}")]
    TileFetch {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The tile service could not be reached.
    #[error("tile transport error: {0}")]
    TileTransport(String),

    /// The tile bytes are not a decodable image.
    #[error("tile decode error: {0}")]
    TileDecode(String),

    /// The composed image could not be encoded.
    #[error("image encode error: {0}")]
    Encode(String),

    /// A configured font file is missing or unparsable.
    #[error("font error: {0}")]
    Font(String),

    /// Requested canvas dimensions are unusable.
    #[error("invalid canvas: {0}")]
    InvalidCanvas(String),
}
