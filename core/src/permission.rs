//! Capability tokens and authenticated principals.
//!
//! A permission is a dotted token such as `inventory.deleted_at.w`; the
//! wildcard `*` grants everything. Authorization is an exact token match or
//! the wildcard, nothing else.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::UserId;

/// Token granting every permission.
pub const WILDCARD: &str = "*";

/// Read live and soft-deleted entities and their history.
pub const INVENTORY_READ: &str = "inventory.r";
/// Create and edit entities.
pub const INVENTORY_WRITE: &str = "inventory.w";
/// Soft-delete entities.
pub const INVENTORY_DELETE: &str = "inventory.deleted_at.w";
/// Read the column schema and its history.
pub const SCHEMA_READ: &str = "inventory.schema.r";
/// Add, edit and remove columns.
pub const SCHEMA_WRITE: &str = "inventory.schema.w";
/// List users.
pub const USERS_READ: &str = "users.r";
/// Deactivate users.
pub const USERS_DELETE: &str = "users.deleted_at.w";
/// Grant and revoke role permissions.
pub const ROLES_WRITE: &str = "roles.w";
/// Read the event log.
pub const EVENTS_READ: &str = "events.r";
/// Change instance settings.
pub const CONFIG_WRITE: &str = "config.w";

/// Returns `true` if `token` is the wildcard or a dotted token of
/// `[a-z0-9_]` segments.
///
/// # Examples
///
/// ```
/// use invman_core::is_valid_permission;
///
/// assert!(is_valid_permission("*"));
/// assert!(is_valid_permission("inventory.deleted_at.w"));
/// assert!(!is_valid_permission("inventory..w"));
/// assert!(!is_valid_permission("inventory.*"));
/// ```
pub fn is_valid_permission(token: &str) -> bool {
    token == WILDCARD
        || token.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
}

/// Set of permission tokens resolved from a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    /// Returns `true` if the set holds `permission` or the wildcard.
    pub fn allows(&self, permission: &str) -> bool {
        self.0.contains(WILDCARD) || self.0.contains(permission)
    }

    /// Iterates over the tokens in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// An authenticated user together with the permissions of their role.
///
/// Obtained from a valid session; every mutating operation takes one and
/// records its `user_id` as the dispatcher. `permissions` is a snapshot
/// taken at login; stores authorize against the role as currently stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub role_id: i64,
    pub role: String,
    pub permissions: PermissionSet,
}

impl Principal {
    /// Returns `true` if the principal's role grants `permission`.
    pub fn authorize(&self, permission: &str) -> bool {
        self.permissions.allows(permission)
    }
}
