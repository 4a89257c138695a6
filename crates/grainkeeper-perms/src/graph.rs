//! Permission propagation over a grain's share graph.
//!
//! The owner is seeded with every permission. Permissions then flow along
//! active edges: a recipient receives what the edge confers, intersected with
//! what the sharer holds. Propagation is a worklist fixed point. Bits only
//! ever turn on and vectors have a fixed length, so it terminates on any
//! graph, cycles included, and the result does not depend on visiting order.
//!
//! Openability is read off the same run: a principal may open the grain iff
//! the worklist reached it, whatever its permissions turned out to be.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use grainkeeper_core::{GrainId, PermissionSet, PrincipalId, RoleAssignment, ShareEdge, ViewInfo};
use tracing::debug;

use crate::assignment::{edge_permissions, permissions_from_role_assignment};
use crate::error::{PermsError, Result};

/// The active share edges of one grain, indexed by sharer.
#[derive(Debug, Clone)]
pub struct SharingGraph {
    grain_id: GrainId,
    owner: PrincipalId,
    outgoing: HashMap<PrincipalId, Vec<ShareEdge>>,
}

impl SharingGraph {
    /// Build the graph for `grain_id` owned by `owner`.
    ///
    /// Inactive edges and edges belonging to other grains are ignored.
    pub fn new(
        grain_id: GrainId,
        owner: PrincipalId,
        edges: impl IntoIterator<Item = ShareEdge>,
    ) -> Self {
        let mut outgoing: HashMap<PrincipalId, Vec<ShareEdge>> = HashMap::new();
        for edge in edges {
            if edge.active && edge.grain_id == grain_id {
                outgoing.entry(edge.sharer.clone()).or_default().push(edge);
            }
        }
        Self {
            grain_id,
            owner,
            outgoing,
        }
    }

    pub fn grain_id(&self) -> &GrainId {
        &self.grain_id
    }

    pub fn owner(&self) -> &PrincipalId {
        &self.owner
    }

    /// Number of active edges.
    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }

    /// Run propagation to its fixed point against `view`.
    pub fn propagate(&self, view: &ViewInfo) -> Propagation {
        let len = view.permission_count();
        let mut permissions: HashMap<PrincipalId, PermissionSet> = HashMap::new();
        permissions.insert(self.owner.clone(), PermissionSet::all(len));

        let mut worklist = vec![self.owner.clone()];
        let mut steps = 0usize;

        while let Some(sharer) = worklist.pop() {
            steps += 1;
            let Some(edges) = self.outgoing.get(&sharer) else {
                continue;
            };
            let held = permissions
                .get(&sharer)
                .cloned()
                .unwrap_or_else(|| PermissionSet::none(len));

            for edge in edges {
                let mut candidate = edge_permissions(edge, view);
                candidate.intersect(&held);

                let grew = match permissions.get_mut(&edge.recipient) {
                    Some(existing) => existing.add(&candidate),
                    None => {
                        permissions.insert(edge.recipient.clone(), candidate);
                        true
                    }
                };
                if grew {
                    worklist.push(edge.recipient.clone());
                }
            }
        }

        debug!(
            grain_id = %self.grain_id,
            reached = permissions.len(),
            steps,
            "propagated permissions"
        );

        Propagation { permissions, len }
    }

    /// Permissions `principal` holds on this grain.
    ///
    /// The owner holds everything. Unreachable principals hold nothing.
    pub fn grain_permissions(&self, principal: &PrincipalId, view: &ViewInfo) -> PermissionSet {
        self.propagate(view).permissions_of(principal)
    }

    /// Whether `principal` is connected to the owner by active edges.
    pub fn may_open(&self, principal: &PrincipalId) -> bool {
        self.propagate(&ViewInfo::empty()).is_reached(principal)
    }

    /// Permissions to grant when `principal` shares without picking a role.
    ///
    /// The principal's own permissions intersected with the app's first role.
    pub fn default_shared_permissions(
        &self,
        principal: &PrincipalId,
        view: &ViewInfo,
    ) -> PermissionSet {
        let mut result = self.grain_permissions(principal, view);
        result.intersect(&permissions_from_role_assignment(
            &RoleAssignment::role(0),
            &PermissionSet::default(),
            &PermissionSet::default(),
            view,
        ));
        result
    }

    /// Every principal that may open the grain, owner included.
    pub fn reachable(&self) -> BTreeSet<PrincipalId> {
        self.propagate(&ViewInfo::empty()).reached().cloned().collect()
    }

    /// Active edges reachable by following shares outward from `principal`.
    ///
    /// Includes the principal's own outgoing edges. Each edge appears once.
    pub fn downstream_edges(&self, principal: &PrincipalId) -> Vec<&ShareEdge> {
        let mut result = Vec::new();
        let mut visited: HashSet<&PrincipalId> = HashSet::new();
        let mut queue: VecDeque<&PrincipalId> = VecDeque::new();
        visited.insert(principal);
        queue.push_back(principal);

        while let Some(sharer) = queue.pop_front() {
            for edge in self.outgoing.get(sharer).into_iter().flatten() {
                result.push(edge);
                if visited.insert(&edge.recipient) {
                    queue.push_back(&edge.recipient);
                }
            }
        }
        result
    }
}

/// The fixed point of one propagation run.
#[derive(Debug, Clone)]
pub struct Propagation {
    permissions: HashMap<PrincipalId, PermissionSet>,
    len: usize,
}

impl Propagation {
    /// Permissions of `principal`, or the all-false vector if it was never reached.
    pub fn permissions_of(&self, principal: &PrincipalId) -> PermissionSet {
        self.permissions
            .get(principal)
            .cloned()
            .unwrap_or_else(|| PermissionSet::none(self.len))
    }

    /// Whether propagation reached `principal` along some active path.
    pub fn is_reached(&self, principal: &PrincipalId) -> bool {
        self.permissions.contains_key(principal)
    }

    /// All reached principals, in no particular order.
    pub fn reached(&self) -> impl Iterator<Item = &PrincipalId> {
        self.permissions.keys()
    }

    /// Fail unless `principal` was reached and holds every permission in `needed`.
    pub fn require(&self, principal: &PrincipalId, needed: &PermissionSet) -> Result<()> {
        let held = self
            .permissions
            .get(principal)
            .ok_or_else(|| PermsError::NotReachable(principal.to_string()))?;
        if !needed.is_subset_of(held) {
            return Err(PermsError::PermissionDenied(principal.to_string()));
        }
        Ok(())
    }
}
