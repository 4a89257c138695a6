//! The Core: permission queries, sharing and sessions over stored grains.
//!
//! `Core` brings the resolver, the store, the sturdy-ref store and the
//! revocation watcher together. Permission queries recompute propagation
//! from stored edges on every call; nothing is cached.

use std::sync::Arc;

use grainkeeper_caps::{CapsConfig, GrainBackend, NotificationCenter, SturdyRefStore};
use grainkeeper_core::{
    EdgeId, GrainId, GrainRecord, PermissionSet, PrincipalId, SessionId, SessionRecord, ShareEdge,
    ViewInfo,
};
use grainkeeper_perms::SharingGraph;
use grainkeeper_store::{Store, StoreExt};
use tracing::{debug, info};

use crate::error::{GrainkeeperError, Result};
use crate::revocation::RevocationWatcher;

/// Configuration for the Core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Sturdy-ref configuration.
    pub caps: CapsConfig,
    /// Requests buffered by [`CoreService`](crate::CoreService) before callers wait.
    pub queue_depth: usize,
    /// Whether deactivating or removing an edge deletes stale sessions.
    pub invalidate_on_revoke: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            caps: CapsConfig::default(),
            queue_depth: 256,
            invalidate_on_revoke: true,
        }
    }
}

/// The main Core struct.
///
/// Provides a unified API for:
/// - Computing what a principal may do with a grain
/// - Adding, deactivating and removing share edges
/// - Opening sessions
/// - Minting and redeeming sturdy refs
pub struct Core<S: Store + 'static> {
    store: Arc<S>,
    refs: SturdyRefStore<S>,
    notifications: NotificationCenter<S>,
    revocation: RevocationWatcher<S>,
    config: CoreConfig,
}

impl<S: Store + 'static> Core<S> {
    /// Create a new core over `store`, reaching grains through `backend`.
    pub fn new(store: S, backend: Arc<dyn GrainBackend>, config: CoreConfig) -> Self {
        let store = Arc::new(store);
        let refs = SturdyRefStore::new(store.clone(), backend, config.caps.clone());
        Self {
            notifications: NotificationCenter::new(refs.clone()),
            revocation: RevocationWatcher::new(store.clone()),
            store,
            refs,
            config,
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn refs(&self) -> &SturdyRefStore<S> {
        &self.refs
    }

    pub fn notifications(&self) -> &NotificationCenter<S> {
        &self.notifications
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grains
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a new grain, or replace an existing one.
    pub async fn create_grain(&self, grain: GrainRecord) -> Result<()> {
        self.store.put_grain(&grain).await?;
        info!(grain_id = %grain.id, owner = %grain.owner, "created grain");
        Ok(())
    }

    /// Record the view the app currently reports for `grain_id`.
    pub async fn update_view(&self, grain_id: &GrainId, view: ViewInfo) -> Result<()> {
        let grain = self
            .store
            .get_grain(grain_id)
            .await?
            .ok_or_else(|| GrainkeeperError::GrainNotFound(grain_id.clone()))?;
        self.store.put_grain(&grain.with_view(view)).await?;
        Ok(())
    }

    /// Move a grain to the trash. Its tokens can no longer be restored.
    pub async fn trash_grain(&self, grain_id: &GrainId) -> Result<()> {
        if !self.store.set_grain_trashed(grain_id, true).await? {
            return Err(GrainkeeperError::GrainNotFound(grain_id.clone()));
        }
        info!(grain_id = %grain_id, "trashed grain");
        Ok(())
    }

    /// The active share graph of a grain, or `None` if the grain does not exist.
    pub async fn sharing_graph(&self, grain_id: &GrainId) -> Result<Option<SharingGraph>> {
        let Some(grain) = self.store.get_grain(grain_id).await? else {
            return Ok(None);
        };
        let edges = self.store.active_edges(grain_id).await?;
        Ok(Some(SharingGraph::new(grain.id, grain.owner, edges)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permission queries
    // ─────────────────────────────────────────────────────────────────────────

    /// What `principal` may do with `grain_id` under `view`.
    ///
    /// Unknown grains and unreachable principals get the all-false vector.
    pub async fn grain_permissions(
        &self,
        grain_id: &GrainId,
        principal: &PrincipalId,
        view: &ViewInfo,
    ) -> Result<PermissionSet> {
        Ok(match self.sharing_graph(grain_id).await? {
            Some(graph) => graph.grain_permissions(principal, view),
            None => PermissionSet::none(view.permission_count()),
        })
    }

    /// Whether `principal` can open `grain_id` at all.
    pub async fn may_open_grain(&self, grain_id: &GrainId, principal: &PrincipalId) -> Result<bool> {
        Ok(match self.sharing_graph(grain_id).await? {
            Some(graph) => graph.may_open(principal),
            None => false,
        })
    }

    /// What `principal` passes on when sharing without picking a role.
    pub async fn default_shared_grain_permissions(
        &self,
        grain_id: &GrainId,
        principal: &PrincipalId,
        view: &ViewInfo,
    ) -> Result<PermissionSet> {
        Ok(match self.sharing_graph(grain_id).await? {
            Some(graph) => graph.default_shared_permissions(principal, view),
            None => PermissionSet::none(view.permission_count()),
        })
    }

    /// Every active edge downstream of `principal`.
    pub async fn downstream_shares(
        &self,
        grain_id: &GrainId,
        principal: &PrincipalId,
    ) -> Result<Vec<ShareEdge>> {
        Ok(match self.sharing_graph(grain_id).await? {
            Some(graph) => graph.downstream_edges(principal).into_iter().cloned().collect(),
            None => Vec::new(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sharing
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a share edge. The sharer must be able to open the grain.
    pub async fn share(&self, edge: ShareEdge) -> Result<EdgeId> {
        if self.store.live_grain(&edge.grain_id).await?.is_none() {
            return Err(GrainkeeperError::GrainNotFound(edge.grain_id.clone()));
        }
        if !self.may_open_grain(&edge.grain_id, &edge.sharer).await? {
            return Err(GrainkeeperError::NotAuthorized(format!(
                "{} cannot open grain {}",
                edge.sharer, edge.grain_id
            )));
        }
        if edge.sharer == edge.recipient {
            return Err(GrainkeeperError::InvalidOperation(
                "cannot share a grain with oneself".into(),
            ));
        }

        self.store.insert_edge(&edge).await?;
        debug!(
            edge = %edge.id,
            grain_id = %edge.grain_id,
            sharer = %edge.sharer,
            recipient = %edge.recipient,
            "added share edge"
        );
        Ok(edge.id)
    }

    /// Activate or deactivate an edge. Deactivating invalidates stale sessions.
    pub async fn set_edge_active(&self, edge_id: &EdgeId, active: bool) -> Result<Vec<SessionId>> {
        let edge = self.require_edge(edge_id).await?;
        self.store.set_edge_active(edge_id, active).await?;
        debug!(edge = %edge_id, active, "updated share edge");

        if active {
            return Ok(Vec::new());
        }
        self.after_revocation(&edge.grain_id).await
    }

    /// Remove an edge outright, invalidating stale sessions.
    pub async fn remove_edge(&self, edge_id: &EdgeId) -> Result<Vec<SessionId>> {
        let edge = self.require_edge(edge_id).await?;
        self.store.delete_edge(edge_id).await?;
        debug!(edge = %edge_id, "removed share edge");
        self.after_revocation(&edge.grain_id).await
    }

    async fn require_edge(&self, edge_id: &EdgeId) -> Result<ShareEdge> {
        self.store
            .get_edge(edge_id)
            .await?
            .ok_or_else(|| GrainkeeperError::EdgeNotFound(edge_id.clone()))
    }

    async fn after_revocation(&self, grain_id: &GrainId) -> Result<Vec<SessionId>> {
        if !self.config.invalidate_on_revoke {
            return Ok(Vec::new());
        }
        self.revocation.on_edges_changed(grain_id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a session for `principal`, who must be able to open the grain.
    pub async fn open_session(
        &self,
        grain_id: &GrainId,
        principal: &PrincipalId,
    ) -> Result<SessionRecord> {
        if self.store.live_grain(grain_id).await?.is_none() {
            return Err(GrainkeeperError::GrainNotFound(grain_id.clone()));
        }
        if !self.may_open_grain(grain_id, principal).await? {
            return Err(GrainkeeperError::NotAuthorized(format!(
                "{} cannot open grain {}",
                principal, grain_id
            )));
        }

        let session = SessionRecord::new(grain_id.clone(), principal.clone());
        self.store.insert_session(&session).await?;
        debug!(session = %session.id, grain_id = %grain_id, principal = %principal, "opened session");
        Ok(session)
    }

    /// Close a session. Returns whether it was open.
    pub async fn close_session(&self, session_id: &SessionId) -> Result<bool> {
        Ok(self.store.delete_session(session_id).await?)
    }

    /// Open sessions on a grain.
    pub async fn sessions(&self, grain_id: &GrainId) -> Result<Vec<SessionRecord>> {
        Ok(self.store.sessions_for_grain(grain_id).await?)
    }
}
