//! # Grainkeeper Permissions
//!
//! Computes what a principal may do with a grain from the grain's share graph.
//!
//! ## Overview
//!
//! Each grain has an owner and a set of share edges. An edge grants a role,
//! adjusted by explicit add and remove lists, from a sharer to a recipient.
//! What a recipient ends up with is bounded by what the sharer holds, so
//! access can only be attenuated as it is passed along.
//!
//! All queries are total. Missing roles, unknown principals and stale edges
//! yield empty results instead of errors, so the resolver can be run against
//! whatever is in storage.
//!
//! ## Usage
//!
//! ```rust
//! use grainkeeper_core::{RoleAssignment, RoleDef, ShareEdge, ViewInfo};
//! use grainkeeper_perms::SharingGraph;
//!
//! let view = ViewInfo::new(["read", "write"], vec![RoleDef::new([true, false])]);
//! let edges = vec![ShareEdge::new("g".into(), "alice".into(), "bob".into(), RoleAssignment::role(0))];
//! let graph = SharingGraph::new("g".into(), "alice".into(), edges);
//!
//! assert!(graph.may_open(&"bob".into()));
//! assert!(graph.grain_permissions(&"bob".into(), &view).get(0));
//! ```

pub mod assignment;
pub mod error;
pub mod graph;

pub use assignment::{edge_permissions, permissions_from_role_assignment};
pub use error::{PermsError, Result};
pub use graph::{Propagation, SharingGraph};
