//! # Grainkeeper Core
//!
//! Pure data model for grainkeeper: identifiers, permission sets, app view
//! descriptions, share edges and sturdy-ref records.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`PermissionSet`] - Boolean vector indexed by an app's declared permissions
//! - [`ViewInfo`] - App-supplied permissions and roles for a grain
//! - [`ShareEdge`] / [`RoleAssignment`] - One sharer granting a role to a recipient
//! - [`TokenRecord`] - Persisted sturdy ref, keyed by the hash of its [`Secret`]
//! - [`Owner`] / [`OwnerPattern`] - Token holder and the structural check against it
//!
//! ## Encoding
//!
//! Token records are stored as integer-keyed CBOR. See the [`codec`] module.

pub mod codec;
pub mod crypto;
pub mod edge;
pub mod error;
pub mod permission;
pub mod records;
pub mod token;
pub mod types;
pub mod view;

pub use codec::{decode_token, encode_token};
pub use crypto::{Secret, TokenHash, MIN_SECRET_LEN, SECRET_LEN};
pub use edge::{RoleAssignment, ShareEdge};
pub use error::CoreError;
pub use permission::PermissionSet;
pub use records::{GrainRecord, NotificationRecord, SessionRecord};
pub use token::{
    FrontendRef, MembraneRequirement, ObjectId, Owner, OwnerPattern, TokenPayload, TokenRecord,
};
pub use types::{now_millis, EdgeId, GrainId, NotificationId, PrincipalId, SessionId};
pub use view::{PermissionDef, RoleDef, ViewInfo};
