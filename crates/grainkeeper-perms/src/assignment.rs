//! Permissions conferred by a single role assignment.

use grainkeeper_core::{PermissionSet, RoleAssignment, ShareEdge, ViewInfo};

/// Permissions an assignment confers, before intersecting with the sharer's own.
///
/// Applies, in this order: the role's base vector, then `add`, then `remove`.
/// A permission listed in both `add` and `remove` ends up removed. The result
/// always has exactly `view.permission_count()` bits.
pub fn permissions_from_role_assignment(
    assignment: &RoleAssignment,
    add: &PermissionSet,
    remove: &PermissionSet,
    view: &ViewInfo,
) -> PermissionSet {
    let mut result = assignment.base_permissions(view);
    result.add(add);
    result.remove(remove);
    result.resized(view.permission_count())
}

/// [`permissions_from_role_assignment`] for a stored edge.
pub fn edge_permissions(edge: &ShareEdge, view: &ViewInfo) -> PermissionSet {
    permissions_from_role_assignment(
        &edge.role_assignment,
        &edge.add_permissions,
        &edge.remove_permissions,
        view,
    )
}
