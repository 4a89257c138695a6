//! Error types for the capability module.

use thiserror::Error;

/// Errors from calls into a grain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The connection to the grain went away, usually because it restarted.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The grain answered with a failure.
    #[error("rpc failed: {0}")]
    Failed(String),
}

impl RpcError {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

/// Why a token was refused. Only ever logged, never returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    NotFound,
    OwnerMismatch,
    Revoked,
    Expired,
    RequirementUnmet,
    GrainUnavailable,
    ChainTooDeep,
    WrongAccount,
}

/// Errors that can occur during capability operations.
#[derive(Debug, Error)]
pub enum CapsError {
    /// The operation was refused. Deliberately carries no reason.
    #[error("capability refused")]
    Refused,

    /// A stored record has no recognizable payload kind.
    #[error("corrupt token {hash}: {reason}")]
    CorruptToken { hash: String, reason: String },

    /// A call into a grain failed.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] grainkeeper_store::StoreError),

    /// The request queue in front of the store has shut down.
    #[error("request queue closed")]
    QueueClosed,

    /// Malformed secret or record.
    #[error("core error: {0}")]
    Core(#[from] grainkeeper_core::CoreError),
}

/// Result type for capability operations.
pub type Result<T> = std::result::Result<T, CapsError>;
