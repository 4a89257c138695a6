//! Error types for grainkeeper core.

use thiserror::Error;

/// Core errors that can occur while handling grainkeeper data.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    /// A stored record names a payload kind this build does not know.
    #[error("unknown payload kind: {0}")]
    UnknownPayloadKind(u64),
}
