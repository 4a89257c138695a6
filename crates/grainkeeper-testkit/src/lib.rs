//! # grainkeeper testkit
//!
//! Testing utilities for grainkeeper.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Scenario vectors**: Small share graphs with known permission outcomes
//! - **Generators**: Proptest strategies for random views and share graphs
//! - **Fixtures**: A core over an in-memory store with in-memory grains
//!
//! ## Scenario Vectors
//!
//! ```rust
//! use grainkeeper_testkit::vectors::all_vectors;
//!
//! for vector in all_vectors() {
//!     assert!(vector.mismatches().is_empty(), "{}", vector.name);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use grainkeeper_testkit::generators::{owner, GraphParams};
//!
//! proptest! {
//!     #[test]
//!     fn owner_may_always_open(params: GraphParams) {
//!         prop_assert!(params.graph().may_open(&owner()));
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use grainkeeper_testkit::fixtures::{scenario_view, TestFixture};
//!
//! let fixture = TestFixture::new();
//! let grain = fixture.add_grain("g", "alice", scenario_view()).await?;
//! fixture.share("g", "alice", "bob", RoleAssignment::role(0)).await?;
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{chain_edges, principals, scenario_view, TestFixture};
pub use generators::{graph_from_edges, GraphParams};
pub use vectors::{all_vectors, ScenarioVector, VectorEdge};
