//! Proptest generators for property-based testing.
//!
//! Principals are drawn from a small pool so that generated share graphs
//! routinely contain cycles, diamonds and self-loops.

use proptest::prelude::*;

use grainkeeper_core::{
    GrainId, PermissionSet, PrincipalId, RoleAssignment, RoleDef, ShareEdge, ViewInfo,
};
use grainkeeper_perms::SharingGraph;

/// Grain every generated edge belongs to.
pub const GRAIN: &str = "grain";

/// Owner of [`GRAIN`]; always `p0`.
pub fn owner() -> PrincipalId {
    PrincipalId::new("p0")
}

/// Generate a principal from a pool of `pool` names.
pub fn principal(pool: usize) -> impl Strategy<Value = PrincipalId> {
    (0..pool.max(1)).prop_map(|i| PrincipalId::new(format!("p{}", i)))
}

/// Generate a permission vector of exactly `len` bits.
pub fn permission_set(len: usize) -> impl Strategy<Value = PermissionSet> {
    prop::collection::vec(any::<bool>(), len).prop_map(PermissionSet::from)
}

/// Generate a view with up to `max_permissions` permissions and `max_roles` roles.
pub fn view_info(max_permissions: usize, max_roles: usize) -> impl Strategy<Value = ViewInfo> {
    (0..=max_permissions).prop_flat_map(move |len| {
        let role = (permission_set(len), any::<bool>(), any::<bool>()).prop_map(
            |(permissions, is_default, is_obsolete)| RoleDef {
                permissions,
                is_default,
                is_obsolete,
                title: None,
            },
        );
        prop::collection::vec(role, 0..=max_roles).prop_map(move |roles| {
            let names = (0..len).map(|i| format!("perm{}", i));
            ViewInfo::new(names, roles)
        })
    })
}

/// Generate a role assignment, sometimes naming a role that does not exist.
pub fn role_assignment(role_count: usize) -> impl Strategy<Value = RoleAssignment> {
    prop_oneof![
        Just(RoleAssignment::none()),
        Just(RoleAssignment::all_access()),
        (0..(role_count as u32 + 2)).prop_map(RoleAssignment::role),
    ]
}

/// Generate an edge of [`GRAIN`] between principals of the pool.
pub fn share_edge(pool: usize, len: usize, role_count: usize) -> impl Strategy<Value = ShareEdge> {
    (
        principal(pool),
        principal(pool),
        role_assignment(role_count),
        prop::option::of(permission_set(len)),
        prop::option::of(permission_set(len)),
        prop::bool::weighted(0.85),
    )
        .prop_map(|(sharer, recipient, role, add, remove, active)| {
            let mut edge = ShareEdge::new(GrainId::new(GRAIN), sharer, recipient, role);
            if let Some(add) = add {
                edge = edge.with_add(add);
            }
            if let Some(remove) = remove {
                edge = edge.with_remove(remove);
            }
            if !active {
                edge = edge.inactive();
            }
            edge
        })
}

/// A random view together with a random share graph over it.
#[derive(Debug, Clone)]
pub struct GraphParams {
    pub view: ViewInfo,
    pub edges: Vec<ShareEdge>,
}

impl GraphParams {
    pub fn graph(&self) -> SharingGraph {
        graph_from_edges(self.edges.iter().cloned())
    }

    /// Every principal that appears on some edge, plus the owner.
    pub fn principals(&self) -> Vec<PrincipalId> {
        let mut all: Vec<PrincipalId> = self
            .edges
            .iter()
            .flat_map(|e| [e.sharer.clone(), e.recipient.clone()])
            .chain(std::iter::once(owner()))
            .collect();
        all.sort();
        all.dedup();
        all
    }
}

impl Arbitrary for GraphParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        view_info(5, 4)
            .prop_flat_map(|view| {
                let len = view.permission_count();
                let roles = view.roles.len();
                let edges = prop::collection::vec(share_edge(6, len, roles), 0..24);
                (Just(view), edges)
            })
            .prop_map(|(view, edges)| GraphParams { view, edges })
            .boxed()
    }
}

/// Build the graph of [`GRAIN`] owned by [`owner()`].
pub fn graph_from_edges(edges: impl IntoIterator<Item = ShareEdge>) -> SharingGraph {
    SharingGraph::new(GrainId::new(GRAIN), owner(), edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_owner_holds_every_permission(params: GraphParams) {
            let graph = params.graph();
            let len = params.view.permission_count();
            prop_assert_eq!(graph.grain_permissions(&owner(), &params.view), PermissionSet::all(len));
            prop_assert!(graph.may_open(&owner()));
        }

        #[test]
        fn test_unreachable_principals_hold_nothing(params: GraphParams) {
            let graph = params.graph();
            let len = params.view.permission_count();
            let stranger = PrincipalId::new("stranger");
            prop_assert_eq!(graph.grain_permissions(&stranger, &params.view), PermissionSet::none(len));
            prop_assert!(!graph.may_open(&stranger));

            let reachable = graph.reachable();
            for principal in params.principals() {
                if !reachable.contains(&principal) {
                    prop_assert_eq!(
                        graph.grain_permissions(&principal, &params.view),
                        PermissionSet::none(len)
                    );
                }
            }
        }

        #[test]
        fn test_adding_an_edge_only_grows(
            params: GraphParams,
            extra in share_edge(6, 5, 4),
        ) {
            // Resize the extra edge's vectors to the view.
            let len = params.view.permission_count();
            let mut extra = extra;
            extra.add_permissions = extra.add_permissions.resized(len);
            extra.remove_permissions = extra.remove_permissions.resized(len);
            extra.active = true;

            let before = params.graph();
            let after = graph_from_edges(params.edges.iter().cloned().chain([extra]));
            let before = before.propagate(&params.view);
            let after = after.propagate(&params.view);

            for principal in params.principals() {
                prop_assert!(before
                    .permissions_of(&principal)
                    .is_subset_of(&after.permissions_of(&principal)));
                if before.is_reached(&principal) {
                    prop_assert!(after.is_reached(&principal));
                }
            }
        }

        #[test]
        fn test_deactivating_an_edge_only_shrinks(params: GraphParams, pick in any::<prop::sample::Index>()) {
            prop_assume!(!params.edges.is_empty());
            let index = pick.index(params.edges.len());
            let mut edges = params.edges.clone();
            edges[index].active = false;

            let before = params.graph().propagate(&params.view);
            let after = graph_from_edges(edges).propagate(&params.view);
            for principal in params.principals() {
                prop_assert!(after
                    .permissions_of(&principal)
                    .is_subset_of(&before.permissions_of(&principal)));
            }
        }

        #[test]
        fn test_result_is_deterministic_and_order_independent(params: GraphParams) {
            let first = params.graph().propagate(&params.view);
            let again = params.graph().propagate(&params.view);
            let reversed = graph_from_edges(params.edges.iter().rev().cloned()).propagate(&params.view);

            for principal in params.principals() {
                let expected = first.permissions_of(&principal);
                prop_assert_eq!(&again.permissions_of(&principal), &expected);
                prop_assert_eq!(&reversed.permissions_of(&principal), &expected);
                prop_assert_eq!(reversed.is_reached(&principal), first.is_reached(&principal));
            }
        }

        #[test]
        fn test_may_open_iff_reached(params: GraphParams) {
            let graph = params.graph();
            let propagation = graph.propagate(&params.view);
            for principal in params.principals() {
                prop_assert_eq!(graph.may_open(&principal), propagation.is_reached(&principal));
            }
        }
    }
}
