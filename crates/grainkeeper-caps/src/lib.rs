//! # Grainkeeper Caps
//!
//! Persistent capabilities for grainkeeper: sturdy refs that outlive the
//! connection a capability arrived on, and the notification handles built
//! on top of them.
//!
//! ## Overview
//!
//! A grain that wants to keep a capability calls `save()` and gets back an
//! unguessable secret. Only the secret's hash is stored, alongside the owner
//! allowed to redeem it. Redeeming checks the owner against a pattern and
//! reconstitutes the capability, calling into the owning grain when the
//! payload is one of its objects.
//!
//! ## Key Properties
//!
//! - **Opaque refusals**: a wrong owner and a missing token are refused alike
//! - **Revocable**: tokens can be revoked, expire, or depend on other tokens
//!   and on permissions still being held
//! - **Restart-tolerant**: a call into a grain that lost its connection is
//!   retried once after restarting the grain
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use grainkeeper_caps::{memory::MemoryBackend, CapsConfig, SturdyRefStore};
//! use grainkeeper_core::{GrainRecord, Owner, OwnerPattern, TokenPayload};
//! use grainkeeper_store::{MemoryStore, Store};
//!
//! async fn example() -> grainkeeper_caps::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.put_grain(&GrainRecord::new("g1", "alice")).await?;
//!     let backend = MemoryBackend::new();
//!     backend.add_grain("g1");
//!
//!     let refs = SturdyRefStore::new(store, backend, CapsConfig::default());
//!     let payload = TokenPayload::app_ref("g1".into(), &b"doc"[..]);
//!     let secret = refs.make_token(payload, Owner::grain("g1")).await?;
//!     let _cap = refs.restore(&secret, &OwnerPattern::grain("g1")).await?;
//!     refs.drop(&secret, &OwnerPattern::grain("g1")).await
//! }
//! ```
//!
//! ## Notification Flow
//!
//! ```text
//! app                    frontend                       store
//!  |-- addOngoing(obj) -->|                               |
//!  |<----- obj.save() ----|-- wakelock token ------------>|
//!  |                      |-- notification record ------->|
//!  |<-- transient handle -|                               |
//!  |-- handle.close() --->|-- take notification --------->|
//!  |<----- drop(wakelock), cancel() (background) ---------|
//! ```

pub mod background;
pub mod backend;
pub mod config;
pub mod error;
pub mod notification;
pub mod sturdy;

pub use background::BackgroundTasks;
pub use backend::{memory, use_grain, AppObject, GrainBackend, Supervisor, TokenMinter};
pub use config::CapsConfig;
pub use error::{CapsError, Refusal, Result, RpcError};
pub use notification::{
    check_ongoing, HandleSink, HandleState, NotificationCenter, NotificationHandle,
};
pub use sturdy::{Capability, PendingRestore, Redeemed, SturdyRefStore, MAX_CHAIN_DEPTH};
