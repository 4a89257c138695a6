//! Canned share-graph vectors with known outcomes.
//!
//! Each vector is a small share graph over the scenario view together with
//! the permissions every listed principal must end up with. They pin down
//! the role precedence and attenuation rules independently of any store.

use grainkeeper_core::{PermissionSet, PrincipalId, RoleAssignment, ShareEdge, ViewInfo};
use grainkeeper_perms::SharingGraph;

use crate::fixtures::scenario_view;

const GRAIN: &str = "vector-grain";
const OWNER: &str = "owner";

/// One edge of a vector.
#[derive(Debug, Clone)]
pub struct VectorEdge {
    pub sharer: &'static str,
    pub recipient: &'static str,
    pub role: RoleAssignment,
    pub add: &'static [bool],
    pub remove: &'static [bool],
    pub active: bool,
}

const fn edge(sharer: &'static str, recipient: &'static str, role: RoleAssignment) -> VectorEdge {
    VectorEdge {
        sharer,
        recipient,
        role,
        add: &[],
        remove: &[],
        active: true,
    }
}

/// A share graph and the outcome it must produce.
#[derive(Debug, Clone)]
pub struct ScenarioVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub edges: Vec<VectorEdge>,
    /// Expected `(principal, permissions, may_open)`.
    pub expected: Vec<(&'static str, [bool; 3], bool)>,
}

impl ScenarioVector {
    pub fn view(&self) -> ViewInfo {
        scenario_view()
    }

    pub fn graph(&self) -> SharingGraph {
        let edges = self.edges.iter().map(|e| {
            let mut edge = ShareEdge::new(GRAIN.into(), e.sharer.into(), e.recipient.into(), e.role)
                .with_add(e.add.to_vec())
                .with_remove(e.remove.to_vec());
            if !e.active {
                edge = edge.inactive();
            }
            edge
        });
        SharingGraph::new(GRAIN.into(), OWNER.into(), edges)
    }

    /// Run the vector, returning `(principal, actual, expected)` for every mismatch.
    pub fn mismatches(&self) -> Vec<(PrincipalId, PermissionSet, PermissionSet)> {
        let view = self.view();
        let graph = self.graph();
        let propagation = graph.propagate(&view);
        self.expected
            .iter()
            .filter_map(|(principal, bits, may_open)| {
                let principal = PrincipalId::from(*principal);
                let actual = propagation.permissions_of(&principal);
                let expected = PermissionSet::from(*bits);
                let open = graph.may_open(&principal);
                (actual != expected || open != *may_open).then_some((principal, actual, expected))
            })
            .collect()
    }
}

/// Get all scenario vectors.
pub fn all_vectors() -> Vec<ScenarioVector> {
    vec![
        ScenarioVector {
            name: "owner alone",
            edges: vec![],
            expected: vec![(OWNER, [true, true, true], true), ("bob", [false; 3], false)],
        },
        ScenarioVector {
            name: "role intersected with sharer",
            edges: vec![
                edge(OWNER, "bob", RoleAssignment::role(0)),
                edge("bob", "carol", RoleAssignment::role(2)),
            ],
            expected: vec![
                ("bob", [true, true, true], true),
                ("carol", [false, false, true], true),
            ],
        },
        ScenarioVector {
            name: "attenuation cannot be undone downstream",
            edges: vec![
                edge(OWNER, "bob", RoleAssignment::role(1)),
                edge("bob", "carol", RoleAssignment::all_access()),
            ],
            expected: vec![
                ("bob", [true, false, false], true),
                ("carol", [true, false, false], true),
            ],
        },
        ScenarioVector {
            name: "no role falls back to the default role",
            edges: vec![edge(OWNER, "bob", RoleAssignment::none())],
            expected: vec![("bob", [true, false, false], true)],
        },
        ScenarioVector {
            name: "missing role confers nothing but still opens",
            edges: vec![edge(OWNER, "bob", RoleAssignment::role(17))],
            expected: vec![("bob", [false, false, false], true)],
        },
        ScenarioVector {
            name: "add applies before remove",
            edges: vec![VectorEdge {
                add: &[false, true, true],
                remove: &[false, false, true],
                ..edge(OWNER, "bob", RoleAssignment::role(1))
            }],
            expected: vec![("bob", [true, true, false], true)],
        },
        ScenarioVector {
            name: "parallel paths union",
            edges: vec![
                edge(OWNER, "bob", RoleAssignment::role(1)),
                edge(OWNER, "carol", RoleAssignment::role(2)),
                edge("bob", "dave", RoleAssignment::all_access()),
                edge("carol", "dave", RoleAssignment::all_access()),
            ],
            expected: vec![("dave", [true, false, true], true)],
        },
        ScenarioVector {
            name: "cycle back to the owner grants nothing new",
            edges: vec![
                edge(OWNER, "bob", RoleAssignment::role(2)),
                edge("bob", "carol", RoleAssignment::all_access()),
                edge("carol", "bob", RoleAssignment::all_access()),
                edge("carol", OWNER, RoleAssignment::all_access()),
            ],
            expected: vec![
                (OWNER, [true, true, true], true),
                ("bob", [false, false, true], true),
                ("carol", [false, false, true], true),
            ],
        },
        ScenarioVector {
            name: "inactive edge is absent",
            edges: vec![
                VectorEdge {
                    active: false,
                    ..edge(OWNER, "bob", RoleAssignment::role(0))
                },
                edge("bob", "carol", RoleAssignment::role(0)),
            ],
            expected: vec![
                ("bob", [false; 3], false),
                ("carol", [false; 3], false),
            ],
        },
    ]
}
