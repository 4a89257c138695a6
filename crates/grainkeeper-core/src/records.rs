//! Grain, session and notification records.

use serde::{Deserialize, Serialize};

use crate::crypto::Secret;
use crate::types::{now_millis, GrainId, NotificationId, PrincipalId, SessionId};
use crate::view::ViewInfo;

/// A grain as far as sharing is concerned: who owns it and whether it is trashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrainRecord {
    pub id: GrainId,
    pub owner: PrincipalId,
    pub title: String,
    pub trashed: bool,
    pub created: i64,

    /// Last view description the app reported, used when no caller supplies one.
    #[serde(default)]
    pub cached_view: ViewInfo,
}

impl GrainRecord {
    pub fn new(id: impl Into<GrainId>, owner: impl Into<PrincipalId>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            title: String::new(),
            trashed: false,
            created: now_millis(),
            cached_view: ViewInfo::default(),
        }
    }

    pub fn with_view(mut self, view: ViewInfo) -> Self {
        self.cached_view = view;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// An open UI session of a principal on a grain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub grain_id: GrainId,
    pub principal: PrincipalId,
    pub created: i64,
}

impl SessionRecord {
    pub fn new(grain_id: GrainId, principal: PrincipalId) -> Self {
        Self {
            id: SessionId::generate(),
            grain_id,
            principal,
            created: now_millis(),
        }
    }
}

/// A notification shown to a grain owner.
///
/// When `ongoing` is set the notification is backed by a wakelock, and the
/// field holds the frontend-owned secret needed to restore and release it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub grain_id: GrainId,
    pub account: PrincipalId,
    pub text: String,
    pub ongoing: Option<Secret>,
    pub timestamp: i64,
    pub is_unread: bool,
}

impl NotificationRecord {
    pub fn new(grain_id: GrainId, account: PrincipalId, text: impl Into<String>) -> Self {
        Self {
            id: NotificationId::generate(),
            grain_id,
            account,
            text: text.into(),
            ongoing: None,
            timestamp: now_millis(),
            is_unread: true,
        }
    }

    pub fn with_ongoing(mut self, wakelock: Secret) -> Self {
        self.ongoing = Some(wakelock);
        self
    }

    pub fn is_ongoing(&self) -> bool {
        self.ongoing.is_some()
    }
}
