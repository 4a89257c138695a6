//! App-supplied view descriptions.
//!
//! A [`ViewInfo`] is read-only input from the app running in a grain. It names
//! the permissions the app understands and groups them into roles. Role ids in
//! share edges are indices into the *unfiltered* role list, so obsolete roles
//! keep their positions.

use serde::{Deserialize, Serialize};

use crate::permission::PermissionSet;

/// A named permission declared by an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A named bundle of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDef {
    pub permissions: PermissionSet,

    /// Assigned when a share does not name a role.
    #[serde(default, rename = "default")]
    pub is_default: bool,

    /// Kept for old edges but hidden from sharing menus.
    #[serde(default, rename = "obsolete")]
    pub is_obsolete: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl RoleDef {
    /// A plain role over the given bits.
    pub fn new(permissions: impl Into<PermissionSet>) -> Self {
        Self {
            permissions: permissions.into(),
            is_default: false,
            is_obsolete: false,
            title: None,
        }
    }

    /// Mark this role as the default role.
    pub fn default_role(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Mark this role as obsolete.
    pub fn obsolete(mut self) -> Self {
        self.is_obsolete = true;
        self
    }
}

/// Per-grain description of permissions and roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewInfo {
    #[serde(default)]
    pub permissions: Vec<PermissionDef>,

    #[serde(default)]
    pub roles: Vec<RoleDef>,
}

impl ViewInfo {
    /// A view with no permissions and no roles.
    ///
    /// Propagating over an empty view only tracks reachability.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a view from permission names and roles.
    pub fn new<I, S>(permission_names: I, roles: Vec<RoleDef>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            permissions: permission_names
                .into_iter()
                .map(|name| PermissionDef {
                    name: name.into(),
                    title: None,
                })
                .collect(),
            roles,
        }
    }

    /// Length of every permission vector computed against this view.
    pub fn permission_count(&self) -> usize {
        self.permissions.len()
    }

    /// Look up a role by its original index.
    pub fn role(&self, role_id: u32) -> Option<&RoleDef> {
        self.roles.get(role_id as usize)
    }

    /// The first role marked default, with its index.
    pub fn default_role(&self) -> Option<(u32, &RoleDef)> {
        self.roles
            .iter()
            .enumerate()
            .find(|(_, role)| role.is_default)
            .map(|(i, role)| (i as u32, role))
    }

    /// Roles to offer in a sharing menu, annotated with their original index.
    ///
    /// Indices are assigned before obsolete roles are filtered out.
    pub fn display_roles(&self) -> Vec<(u32, &RoleDef)> {
        self.roles
            .iter()
            .enumerate()
            .map(|(i, role)| (i as u32, role))
            .filter(|(_, role)| !role.is_obsolete)
            .collect()
    }

    /// Index of a permission by name.
    pub fn permission_index(&self, name: &str) -> Option<usize> {
        self.permissions.iter().position(|p| p.name == name)
    }
}
