//! # Grainkeeper
//!
//! Sharing and persistent capabilities for sandboxed application
//! instances ("grains").
//!
//! ## Overview
//!
//! Grainkeeper answers two questions for the system around it:
//!
//! - **Who may do what with a grain**: permissions flow from the grain's
//!   owner along share edges, attenuated at every hop
//! - **Which capabilities survive a restart**: grains trade live
//!   capabilities for sturdy refs that can be redeemed later
//!
//! ## Key Concepts
//!
//! - **Share edge**: one principal granting a role to another on a grain.
//!   Deactivating it revokes everything that depended on it.
//! - **Sturdy ref**: an unguessable secret standing in for a capability.
//!   Only its hash is stored.
//! - **Owner pattern**: the check a sturdy ref must pass to be redeemed.
//! - **Ongoing notification**: a notification kept alive by a wakelock in
//!   the grain until it is dismissed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use grainkeeper::{Core, CoreConfig, CoreService};
//! use grainkeeper::caps::memory::MemoryBackend;
//! use grainkeeper::core::{GrainRecord, RoleAssignment, ShareEdge, ViewInfo};
//! use grainkeeper::store::SqliteStore;
//!
//! async fn example() -> grainkeeper::Result<()> {
//!     let store = SqliteStore::open("grainkeeper.db")?;
//!     let core = Core::new(store, MemoryBackend::new(), CoreConfig::default());
//!     core.create_grain(GrainRecord::new("g1", "alice")).await?;
//!
//!     let (service, _actor) = CoreService::spawn(core);
//!     let edge = ShareEdge::new("g1".into(), "alice".into(), "bob".into(), RoleAssignment::role(0));
//!     service.share(edge).await?;
//!     let perms = service
//!         .grain_permissions("g1".into(), "bob".into(), ViewInfo::empty())
//!         .await?;
//!     println!("bob holds {:?}", perms);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `grainkeeper::core` - Data model (ids, permission sets, records)
//! - `grainkeeper::perms` - Permission propagation
//! - `grainkeeper::store` - Storage abstraction and SQLite
//! - `grainkeeper::caps` - Sturdy refs and notification handles

pub mod engine;
pub mod error;
pub mod grain;
pub mod revocation;
pub mod service;

// Re-export component crates
pub use grainkeeper_caps as caps;
pub use grainkeeper_core as core;
pub use grainkeeper_perms as perms;
pub use grainkeeper_store as store;

// Re-export main types for convenience
pub use engine::{Core, CoreConfig};
pub use error::{GrainkeeperError, Result};
pub use grain::{GrainCore, OwnerNotificationTarget};
pub use revocation::RevocationWatcher;
pub use service::{CoreActor, CoreService, ToCoreActor};

// Re-export commonly used types
pub use grainkeeper_caps::{Capability, CapsConfig, HandleState, NotificationHandle};
pub use grainkeeper_core::{
    GrainId, OwnerPattern, Owner, PermissionSet, PrincipalId, Secret, ShareEdge, ViewInfo,
};
