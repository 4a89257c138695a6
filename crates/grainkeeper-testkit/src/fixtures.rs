//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: a core over an in-memory store,
//! with in-memory grains behind it.

use std::sync::Arc;

use grainkeeper::{Core, CoreConfig, Result};
use grainkeeper_caps::memory::{MemoryBackend, MemoryGrain};
use grainkeeper_core::{
    EdgeId, GrainId, GrainRecord, PrincipalId, RoleAssignment, RoleDef, ShareEdge, ViewInfo,
};
use grainkeeper_store::MemoryStore;

/// The three-permission, four-role view used throughout the scenarios.
pub fn scenario_view() -> ViewInfo {
    ViewInfo::new(
        ["one", "two", "three"],
        vec![
            RoleDef::new([true, true, true]),
            RoleDef::new([true, false, false]).default_role(),
            RoleDef::new([false, false, true]),
            RoleDef::new([false, false, false]),
        ],
    )
}

/// A core over a memory store, with a memory backend for its grains.
pub struct TestFixture {
    pub core: Core<MemoryStore>,
    pub backend: Arc<MemoryBackend>,
}

impl TestFixture {
    /// Create a new test fixture with default configuration.
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let backend = MemoryBackend::new();
        let core = Core::new(MemoryStore::new(), backend.clone(), config);
        Self { core, backend }
    }

    /// Create a running grain owned by `owner` with `view`.
    pub async fn add_grain(
        &self,
        grain_id: &str,
        owner: &str,
        view: ViewInfo,
    ) -> Result<Arc<MemoryGrain>> {
        let grain = self.backend.add_grain(grain_id);
        self.core
            .create_grain(GrainRecord::new(grain_id, owner).with_view(view))
            .await?;
        Ok(grain)
    }

    /// Share `grain_id` from `sharer` to `recipient`.
    pub async fn share(
        &self,
        grain_id: &str,
        sharer: &str,
        recipient: &str,
        role: RoleAssignment,
    ) -> Result<EdgeId> {
        let edge = ShareEdge::new(
            GrainId::from(grain_id),
            PrincipalId::from(sharer),
            PrincipalId::from(recipient),
            role,
        );
        self.core.share(edge).await
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` distinct principals named `p0`, `p1`, ...
pub fn principals(count: usize) -> Vec<PrincipalId> {
    (0..count).map(|i| PrincipalId::new(format!("p{}", i))).collect()
}

/// Edges sharing `grain_id` along a chain `p0 -> p1 -> ... -> p(len)`.
pub fn chain_edges(grain_id: &str, len: usize, role: RoleAssignment) -> Vec<ShareEdge> {
    principals(len + 1)
        .windows(2)
        .map(|pair| ShareEdge::new(grain_id.into(), pair[0].clone(), pair[1].clone(), role))
        .collect()
}
