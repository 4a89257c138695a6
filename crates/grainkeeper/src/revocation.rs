//! Session invalidation after sharing edges change.
//!
//! A session is only valid while its principal can still open the grain.
//! After an edge is deactivated or removed, reachability is recomputed and
//! every session that lost it is deleted before the mutation returns. The
//! owner's sessions are never touched.

use std::collections::HashSet;
use std::sync::Arc;

use grainkeeper_core::{GrainId, PrincipalId, SessionId, ViewInfo};
use grainkeeper_perms::SharingGraph;
use grainkeeper_store::{Store, StoreExt};
use tracing::{debug, info};

use crate::error::Result;

/// Deletes sessions whose principals are no longer reachable.
pub struct RevocationWatcher<S: Store> {
    store: Arc<S>,
}

impl<S: Store> RevocationWatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Recompute reachability for `grain_id` and delete stale sessions.
    ///
    /// Returns the ids of the sessions removed.
    pub async fn on_edges_changed(&self, grain_id: &GrainId) -> Result<Vec<SessionId>> {
        let Some(grain) = self.store.get_grain(grain_id).await? else {
            return Ok(Vec::new());
        };
        let edges = self.store.active_edges(grain_id).await?;
        let graph = SharingGraph::new(grain.id.clone(), grain.owner.clone(), edges);

        // Reachability does not depend on the view.
        let reachable: HashSet<PrincipalId> = graph
            .propagate(&ViewInfo::empty())
            .reached()
            .cloned()
            .collect();

        let mut removed = Vec::new();
        for session in self.store.sessions_for_grain(grain_id).await? {
            if session.principal == grain.owner || reachable.contains(&session.principal) {
                continue;
            }
            if self.store.delete_session(&session.id).await? {
                debug!(session = %session.id, principal = %session.principal, "invalidated session");
                removed.push(session.id);
            }
        }

        if !removed.is_empty() {
            info!(grain_id = %grain_id, count = removed.len(), "invalidated sessions after revocation");
        }
        Ok(removed)
    }
}
