//! Share edges: role assignments from a sharer to a recipient.

use serde::{Deserialize, Serialize};

use crate::permission::PermissionSet;
use crate::types::{now_millis, EdgeId, GrainId, PrincipalId};
use crate::view::ViewInfo;

/// Which role a share grants.
///
/// Wire shape is externally tagged: `{"allAccess": null}`, `{"roleId": 2}`
/// or `{"none": null}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoleAssignment {
    /// No role chosen; the app's default role applies.
    None(()),
    /// Every permission the app declares.
    AllAccess(()),
    /// Index into the app's unfiltered role list.
    RoleId(u32),
}

impl RoleAssignment {
    pub const fn none() -> Self {
        Self::None(())
    }

    pub const fn all_access() -> Self {
        Self::AllAccess(())
    }

    pub const fn role(id: u32) -> Self {
        Self::RoleId(id)
    }

    /// Base permission vector for this assignment, before add/remove adjustments.
    ///
    /// Unknown role ids and views without roles yield the all-false vector.
    pub fn base_permissions(&self, view: &ViewInfo) -> PermissionSet {
        let len = view.permission_count();
        match self {
            Self::AllAccess(()) => PermissionSet::all(len),
            Self::RoleId(id) => view
                .role(*id)
                .map(|role| role.permissions.resized(len))
                .unwrap_or_else(|| PermissionSet::none(len)),
            Self::None(()) => view
                .default_role()
                .map(|(_, role)| role.permissions.resized(len))
                .unwrap_or_else(|| PermissionSet::none(len)),
        }
    }
}

/// A directed role assignment on one grain.
///
/// Inactive edges stay stored for audit and undo but are ignored by the
/// permission resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareEdge {
    pub id: EdgeId,
    pub grain_id: GrainId,
    pub sharer: PrincipalId,
    pub recipient: PrincipalId,
    pub role_assignment: RoleAssignment,

    #[serde(default)]
    pub add_permissions: PermissionSet,

    #[serde(default)]
    pub remove_permissions: PermissionSet,

    pub active: bool,
    pub created: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub petname: Option<String>,
}

impl ShareEdge {
    /// A fresh active edge with a generated id.
    pub fn new(
        grain_id: GrainId,
        sharer: PrincipalId,
        recipient: PrincipalId,
        role_assignment: RoleAssignment,
    ) -> Self {
        Self {
            id: EdgeId::generate(),
            grain_id,
            sharer,
            recipient,
            role_assignment,
            add_permissions: PermissionSet::default(),
            remove_permissions: PermissionSet::default(),
            active: true,
            created: now_millis(),
            petname: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<EdgeId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_add(mut self, add: impl Into<PermissionSet>) -> Self {
        self.add_permissions = add.into();
        self
    }

    pub fn with_remove(mut self, remove: impl Into<PermissionSet>) -> Self {
        self.remove_permissions = remove.into();
        self
    }

    pub fn with_petname(mut self, petname: impl Into<String>) -> Self {
        self.petname = Some(petname.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::RoleDef;

    fn view() -> ViewInfo {
        ViewInfo::new(
            ["one", "two", "three"],
            vec![
                RoleDef::new([true, true, true]),
                RoleDef::new([true, false, false]).default_role(),
                RoleDef::new([false, false, true]),
            ],
        )
    }

    #[test]
    fn test_base_permissions() {
        let view = view();
        assert_eq!(
            RoleAssignment::all_access().base_permissions(&view),
            PermissionSet::all(3)
        );
        assert_eq!(
            RoleAssignment::role(2).base_permissions(&view),
            PermissionSet::from([false, false, true])
        );
        assert_eq!(
            RoleAssignment::none().base_permissions(&view),
            PermissionSet::from([true, false, false])
        );
    }

    #[test]
    fn test_out_of_range_role_is_empty() {
        let base = RoleAssignment::role(99).base_permissions(&view());
        assert_eq!(base, PermissionSet::none(3));
        let base = RoleAssignment::role(0).base_permissions(&ViewInfo::empty());
        assert_eq!(base.len(), 0);
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_string(&RoleAssignment::all_access()).unwrap();
        assert_eq!(json, r#"{"allAccess":null}"#);
        let parsed: RoleAssignment = serde_json::from_str(r#"{"roleId":3}"#).unwrap();
        assert_eq!(parsed, RoleAssignment::role(3));
    }

    #[test]
    fn test_edge_builder() {
        let edge = ShareEdge::new(
            "g".into(),
            "alice".into(),
            "bob".into(),
            RoleAssignment::role(1),
        )
        .with_add([false, true])
        .inactive();
        assert!(!edge.active);
        assert!(edge.add_permissions.get(1));
        assert!(edge.remove_permissions.is_empty());
    }
}
