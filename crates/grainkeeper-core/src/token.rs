//! Sturdy-ref records: what a token stands for and who may redeem it.
//!
//! A record is keyed by the [`TokenHash`] of its secret. Its [`Owner`] is fixed
//! when the token is minted and checked against a caller-supplied
//! [`OwnerPattern`] on every restore or drop.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::TokenHash;
use crate::permission::PermissionSet;
use crate::types::{now_millis, GrainId, NotificationId, PrincipalId};

/// A capability exported by a grain, identified the way its supervisor understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectId {
    /// Opaque reference chosen by the app.
    AppRef(Bytes),
    /// An ongoing notification held open by the supervisor.
    WakeLockNotification(u32),
}

/// A capability implemented by the frontend itself rather than by a grain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrontendRef {
    NotificationHandle(NotificationId),
}

/// What a token restores to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenPayload {
    /// An object living in a grain.
    Object { grain_id: GrainId, object_id: ObjectId },
    /// A frontend-implemented capability.
    Frontend(FrontendRef),
    /// An attenuated alias of another token.
    Child { parent: TokenHash },
}

impl TokenPayload {
    pub fn app_ref(grain_id: GrainId, data: impl Into<Bytes>) -> Self {
        Self::Object {
            grain_id,
            object_id: ObjectId::AppRef(data.into()),
        }
    }

    pub fn notification(id: NotificationId) -> Self {
        Self::Frontend(FrontendRef::NotificationHandle(id))
    }

    /// The notification this payload is a handle on, if any.
    pub fn notification_id(&self) -> Option<&NotificationId> {
        match self {
            Self::Frontend(FrontendRef::NotificationHandle(id)) => Some(id),
            _ => None,
        }
    }

    /// The grain hosting the object, if this payload names one.
    pub fn grain_id(&self) -> Option<&GrainId> {
        match self {
            Self::Object { grain_id, .. } => Some(grain_id),
            _ => None,
        }
    }
}

/// Who holds a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Owner {
    /// Held by a grain, which may label it for its own bookkeeping.
    Grain {
        grain_id: GrainId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_label: Option<String>,
    },
    /// Held by a user account.
    User {
        account_id: PrincipalId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Held by the frontend on behalf of the system.
    Frontend,
    /// A bearer token that may be shared as a link.
    Webkey { for_sharing: bool },
}

impl Owner {
    pub fn grain(grain_id: impl Into<GrainId>) -> Self {
        Self::Grain {
            grain_id: grain_id.into(),
            save_label: None,
        }
    }

    pub fn user(account_id: impl Into<PrincipalId>) -> Self {
        Self::User {
            account_id: account_id.into(),
            title: None,
        }
    }
}

/// A structural filter over [`Owner`].
///
/// `None` fields are wildcards; other fields of the owner are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OwnerPattern {
    Any,
    Grain { grain_id: Option<GrainId> },
    User { account_id: Option<PrincipalId> },
    Frontend,
    Webkey,
}

impl OwnerPattern {
    pub fn grain(grain_id: impl Into<GrainId>) -> Self {
        Self::Grain {
            grain_id: Some(grain_id.into()),
        }
    }

    pub fn user(account_id: impl Into<PrincipalId>) -> Self {
        Self::User {
            account_id: Some(account_id.into()),
        }
    }

    /// Whether `owner` satisfies this pattern.
    pub fn matches(&self, owner: &Owner) -> bool {
        match (self, owner) {
            (Self::Any, _) => true,
            (Self::Grain { grain_id: want }, Owner::Grain { grain_id, .. }) => {
                want.as_ref().map_or(true, |w| w == grain_id)
            }
            (Self::User { account_id: want }, Owner::User { account_id, .. }) => {
                want.as_ref().map_or(true, |w| w == account_id)
            }
            (Self::Frontend, Owner::Frontend) => true,
            (Self::Webkey, Owner::Webkey { .. }) => true,
            _ => false,
        }
    }
}

/// A condition that must keep holding for a token to stay redeemable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MembraneRequirement {
    /// `principal` must still hold at least `permissions` on `grain_id`.
    PermissionsHeld {
        grain_id: GrainId,
        principal: PrincipalId,
        permissions: PermissionSet,
    },
    /// Another token must still exist and be unrevoked.
    TokenValid(TokenHash),
}

/// A persisted sturdy-ref record. The secret itself is never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub hash: TokenHash,
    pub owner: Owner,
    pub payload: TokenPayload,
    pub created: i64,
    pub expires: Option<i64>,
    pub revoked: bool,
    pub requirements: Vec<MembraneRequirement>,
}

impl TokenRecord {
    pub fn new(hash: TokenHash, owner: Owner, payload: TokenPayload) -> Self {
        Self {
            hash,
            owner,
            payload,
            created: now_millis(),
            expires: None,
            revoked: false,
            requirements: Vec::new(),
        }
    }

    pub fn with_expires(mut self, expires: Option<i64>) -> Self {
        self.expires = expires;
        self
    }

    pub fn with_requirements(mut self, requirements: Vec<MembraneRequirement>) -> Self {
        self.requirements = requirements;
        self
    }

    /// Whether the record has passed its expiry at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires.map_or(false, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grain_pattern_ignores_label() {
        let owner = Owner::Grain {
            grain_id: "g1".into(),
            save_label: Some("inbox".into()),
        };
        assert!(OwnerPattern::grain("g1").matches(&owner));
        assert!(!OwnerPattern::grain("g2").matches(&owner));
        assert!(OwnerPattern::Grain { grain_id: None }.matches(&owner));
        assert!(OwnerPattern::Any.matches(&owner));
    }

    #[test]
    fn test_patterns_do_not_cross_kinds() {
        assert!(!OwnerPattern::Frontend.matches(&Owner::grain("g1")));
        assert!(!OwnerPattern::grain("g1").matches(&Owner::Frontend));
        assert!(!OwnerPattern::user("alice").matches(&Owner::Webkey { for_sharing: true }));
        assert!(OwnerPattern::user("alice").matches(&Owner::User {
            account_id: "alice".into(),
            title: Some("laptop".into()),
        }));
    }

    #[test]
    fn test_notification_payload() {
        let payload = TokenPayload::notification("n1".into());
        assert_eq!(payload.notification_id(), Some(&NotificationId::new("n1")));
        assert!(payload.grain_id().is_none());
        let object = TokenPayload::app_ref("g".into(), &b"x"[..]);
        assert!(object.notification_id().is_none());
    }

    #[test]
    fn test_expiry() {
        let record = TokenRecord::new(TokenHash::of(b"s"), Owner::Frontend, TokenPayload::notification("n".into()))
            .with_expires(Some(100));
        assert!(!record.is_expired(99));
        assert!(record.is_expired(100));
    }
}
