//! Error types for the permissions module.
//!
//! Permission queries themselves never fail. These errors are only produced
//! when a caller asks for a permission check to be enforced.

use thiserror::Error;

/// Errors that can occur when enforcing permissions.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Principal is reachable but lacks a required permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Principal has no active path from the grain owner.
    #[error("no active share path to {0}")]
    NotReachable(String),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
