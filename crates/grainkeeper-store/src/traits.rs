//! Store trait: the abstract interface for grainkeeper persistence.
//!
//! This trait allows the core to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use grainkeeper_core::{
    EdgeId, GrainId, GrainRecord, NotificationId, NotificationRecord, PrincipalId, SessionId,
    SessionRecord, ShareEdge, TokenHash, TokenRecord,
};

use crate::error::{Result, StoreError};

/// The Store trait: async interface for grains, share edges, sessions,
/// sturdy-ref records and notifications.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// Mutations that target a missing row report `false` (or `None`) instead of
/// failing, so callers can treat repeated deletes as no-ops.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Grains
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a grain.
    async fn put_grain(&self, grain: &GrainRecord) -> Result<()>;

    /// Get a grain by ID, trashed or not.
    async fn get_grain(&self, id: &GrainId) -> Result<Option<GrainRecord>>;

    /// Move a grain in or out of the trash. Returns whether the grain exists.
    async fn set_grain_trashed(&self, id: &GrainId, trashed: bool) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Share edges
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new edge.
    async fn insert_edge(&self, edge: &ShareEdge) -> Result<()>;

    /// Get an edge by ID, active or not.
    async fn get_edge(&self, id: &EdgeId) -> Result<Option<ShareEdge>>;

    /// All edges of a grain, active and inactive, oldest first.
    async fn edges_for_grain(&self, grain_id: &GrainId) -> Result<Vec<ShareEdge>>;

    /// Flip an edge's active flag. Returns whether the edge exists.
    async fn set_edge_active(&self, id: &EdgeId, active: bool) -> Result<bool>;

    /// Delete an edge outright. Returns whether it existed.
    async fn delete_edge(&self, id: &EdgeId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_session(&self, session: &SessionRecord) -> Result<()>;

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>>;

    async fn sessions_for_grain(&self, grain_id: &GrainId) -> Result<Vec<SessionRecord>>;

    async fn delete_session(&self, id: &SessionId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Sturdy-ref records
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a record. Hashes are unique; inserting an existing hash fails.
    async fn insert_token(&self, record: &TokenRecord) -> Result<()>;

    /// Look up a record by the hash of its secret.
    ///
    /// A record that cannot be decoded yields [`StoreError::CorruptRecord`].
    async fn get_token(&self, hash: &TokenHash) -> Result<Option<TokenRecord>>;

    /// Delete a record. Returns whether it existed.
    async fn delete_token(&self, hash: &TokenHash) -> Result<bool>;

    /// Set a record's revoked flag. Returns whether it exists.
    async fn set_token_revoked(&self, hash: &TokenHash, revoked: bool) -> Result<bool>;

    /// Number of records whose payload is a handle on `notification_id`.
    async fn count_notification_tokens(&self, notification_id: &NotificationId) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_notification(&self, notification: &NotificationRecord) -> Result<()>;

    async fn get_notification(&self, id: &NotificationId) -> Result<Option<NotificationRecord>>;

    /// Remove a notification, returning what was removed.
    async fn take_notification(&self, id: &NotificationId) -> Result<Option<NotificationRecord>>;

    /// Notifications addressed to `account`, newest first.
    async fn notifications_for(&self, account: &PrincipalId) -> Result<Vec<NotificationRecord>>;

    /// Clear the unread flag on every notification of `account`. Returns how many changed.
    async fn mark_notifications_read(&self, account: &PrincipalId) -> Result<usize>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Get a grain that exists and is not in the trash.
    fn live_grain(
        &self,
        id: &GrainId,
    ) -> impl std::future::Future<Output = Result<Option<GrainRecord>>> + Send;

    /// Like [`StoreExt::live_grain`] but missing grains are an error.
    fn require_grain(
        &self,
        id: &GrainId,
    ) -> impl std::future::Future<Output = Result<GrainRecord>> + Send;

    /// Active edges of a grain.
    fn active_edges(
        &self,
        grain_id: &GrainId,
    ) -> impl std::future::Future<Output = Result<Vec<ShareEdge>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn live_grain(&self, id: &GrainId) -> Result<Option<GrainRecord>> {
        Ok(self.get_grain(id).await?.filter(|grain| !grain.trashed))
    }

    async fn require_grain(&self, id: &GrainId) -> Result<GrainRecord> {
        self.live_grain(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("grain {}", id)))
    }

    async fn active_edges(&self, grain_id: &GrainId) -> Result<Vec<ShareEdge>> {
        let mut edges = self.edges_for_grain(grain_id).await?;
        edges.retain(|edge| edge.active);
        Ok(edges)
    }
}
