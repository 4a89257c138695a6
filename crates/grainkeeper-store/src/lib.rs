//! # Grainkeeper Store
//!
//! Storage abstraction for grainkeeper. Provides a trait-based interface for
//! grains, share edges, sessions, sturdy-ref records and notifications, with
//! SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`StoreExt`] - Convenience queries built on [`Store`]
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use grainkeeper_core::GrainRecord;
//! use grainkeeper_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("grainkeeper.db").unwrap();
//!     store.put_grain(&GrainRecord::new("g1", "alice")).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Hashes only**: token rows are keyed by the Blake3 hash of the secret;
//!   the secret itself never reaches storage
//! - **Encoded records**: token records are stored as CBOR and decoded on
//!   read, so an unreadable record is reported as [`StoreError::CorruptRecord`]
//! - **Soft edges**: deactivated share edges stay stored until deleted

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{Store, StoreExt};
