//! Error types for grainkeeper.

use grainkeeper_caps::CapsError;
use grainkeeper_core::{EdgeId, GrainId};
use grainkeeper_perms::PermsError;
use grainkeeper_store::StoreError;
use thiserror::Error;

/// Errors that can occur during grainkeeper operations.
#[derive(Debug, Error)]
pub enum GrainkeeperError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Capability error, including refusals.
    #[error("capability error: {0}")]
    Caps(#[from] CapsError),

    /// Permission error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Grain not found or in the trash.
    #[error("grain not found: {0}")]
    GrainNotFound(GrainId),

    /// Share edge not found.
    #[error("edge not found: {0}")]
    EdgeNotFound(EdgeId),

    /// Not authorized.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The request queue has shut down.
    #[error("core service stopped")]
    ServiceStopped,
}

impl GrainkeeperError {
    /// Whether this is a capability refusal, which callers must not tell apart further.
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Caps(CapsError::Refused))
    }
}

/// Result type for grainkeeper operations.
pub type Result<T> = std::result::Result<T, GrainkeeperError>;
