//! Users, roles and permissions.
//!
//! Every user has exactly one role; a role holds a set of permission tokens
//! through the `role_permissions` join. The first registered user becomes
//! `admin` (role 1, holding `*`); everyone after starts as `guest` (role 2,
//! holding nothing until an administrator grants permissions).

use invman_core::{
    EventAction, PermissionSet, Principal, ROLES_WRITE, USERS_DELETE, USERS_READ, UserId,
    is_valid_permission,
};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, warn};

use crate::convert::now;
use crate::error::{Result, StoreError};
use crate::events;
use crate::password::{HashingParams, hash_password, verify_password};
use crate::session::{self, IssuedSession};
use crate::settings;
use crate::store::Scope;

/// Role given to the first registered user.
pub const ADMIN_ROLE_ID: i64 = 1;

/// Role given to every later user.
pub const GUEST_ROLE_ID: i64 = 2;

const MAX_USERNAME_LEN: usize = 64;

/// Returns `true` if the principal's role grants `permission` (exact token
/// or `*`).
pub fn authorize(principal: &Principal, permission: &str) -> bool {
    principal.authorize(permission)
}

/// Fails with [`StoreError::PermissionDenied`] unless the caller's role
/// holds `permission` as currently stored.
///
/// The user and role are read again through `conn`, so the permissions
/// carried by `principal` are not trusted and a deactivated user fails
/// with [`StoreError::SessionExpired`]. Writers pass their transaction.
pub(crate) fn require(conn: &Connection, prefix: &str, principal: &Principal, permission: &str) -> Result<()> {
    let current = load_principal(conn, prefix, principal.user_id)?;
    if authorize(&current, permission) {
        Ok(())
    } else {
        debug!(user_id = principal.user_id, permission, "permission denied");
        Err(StoreError::PermissionDenied(permission.to_string()))
    }
}

/// Resolves a live user into a principal with their role's permissions.
pub(crate) fn load_principal(conn: &Connection, prefix: &str, user_id: UserId) -> Result<Principal> {
    let user: Option<(String, i64, String)> = conn
        .query_row(
            &format!(
                "SELECT u.username, u.role_id, r.name FROM {prefix}users u
                 JOIN {prefix}roles r ON r.id = u.role_id
                 WHERE u.id = ?1 AND u.deleted_at IS NULL"
            ),
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let (username, role_id, role) = user.ok_or(StoreError::SessionExpired)?;

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT p.name FROM {prefix}role_permissions rp
         JOIN {prefix}permissions p ON p.id = rp.permission_id
         WHERE rp.role_id = ?1"
    ))?;
    let permissions = stmt
        .query_map([role_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<PermissionSet>>()?;

    Ok(Principal {
        user_id,
        username,
        role_id,
        role,
        permissions,
    })
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        return Err(StoreError::InvalidInput(format!(
            "username must be between 1 and {MAX_USERNAME_LEN} characters"
        )));
    }
    if username.contains(':') || username.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(StoreError::InvalidInput(
            "username must not contain ':', whitespace or control characters".into(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(StoreError::InvalidInput("password must not be empty".into()));
    }
    Ok(())
}

/// A user as listed by [`IdentityStore::list_users`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub role: String,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

/// Registration, authentication and account management.
pub struct IdentityStore<'a> {
    scope: Scope<'a>,
    hashing: HashingParams,
}

impl<'a> IdentityStore<'a> {
    pub(crate) fn new(scope: Scope<'a>, hashing: HashingParams) -> Self {
        Self { scope, hashing }
    }

    /// Registers a new user and returns their id.
    ///
    /// # Errors
    ///
    /// - [`StoreError::RegistrationDisabled`] when the `allow_registration`
    ///   setting is `false`
    /// - [`StoreError::DuplicateUsername`] when the name is taken, including
    ///   by a deactivated user
    /// - [`StoreError::InvalidInput`] for an empty or malformed username or
    ///   an empty password
    pub fn register(&self, username: &str, password: &str) -> Result<UserId> {
        validate_username(username)?;
        validate_password(password)?;
        let hash = hash_password(&self.hashing, password)?;

        let prefix = self.scope.prefix;
        let (user_id, role_id) = self.scope.write(|tx| {
            if !settings::registration_allowed(tx, prefix)? {
                return Err(StoreError::RegistrationDisabled);
            }
            let taken: Option<i64> = tx
                .query_row(
                    &format!("SELECT id FROM {prefix}users WHERE username = ?1"),
                    [username],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(StoreError::DuplicateUsername(username.to_string()));
            }

            let existing: i64 =
                tx.query_row(&format!("SELECT COUNT(*) FROM {prefix}users"), [], |row| row.get(0))?;
            let role_id = if existing == 0 { ADMIN_ROLE_ID } else { GUEST_ROLE_ID };
            let at = now();
            tx.execute(
                &format!(
                    "INSERT INTO {prefix}users (username, role_id, password_hash, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)"
                ),
                params![username, role_id, hash, at],
            )?;
            let user_id = tx.last_insert_rowid();
            events::append(tx, prefix, EventAction::UserRegister, Some(user_id), Some(user_id), None)?;
            Ok((user_id, role_id))
        })?;

        debug!(user_id, role_id, "user registered");
        Ok(user_id)
    }

    /// Checks credentials and issues a session.
    ///
    /// Unknown users, deactivated users and wrong passwords all fail with
    /// the same [`StoreError::InvalidCredentials`].
    pub fn authenticate(&self, username: &str, password: &str) -> Result<IssuedSession> {
        let prefix = self.scope.prefix;
        let user: Option<(UserId, String, Option<String>)> = self
            .scope
            .conn
            .query_row(
                &format!("SELECT id, password_hash, deleted_at FROM {prefix}users WHERE username = ?1"),
                [username],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let user_id = match user {
            Some((id, hash, None)) if verify_password(password, &hash)? => id,
            _ => {
                warn!(username, "rejected login");
                return Err(StoreError::InvalidCredentials);
            }
        };

        let session = self.scope.write(|tx| {
            let session = session::issue(tx, prefix, user_id)?;
            events::append(tx, prefix, EventAction::UserLogin, Some(user_id), Some(user_id), None)?;
            Ok(session)
        })?;

        debug!(user_id, valid_until = %session.valid_until, "session issued");
        Ok(session)
    }

    /// Replaces the principal's own password after checking the old one.
    pub fn change_password(&self, principal: &Principal, old: &str, new: &str) -> Result<()> {
        validate_password(new)?;
        let prefix = self.scope.prefix;
        let current: String = self
            .scope
            .conn
            .query_row(
                &format!("SELECT password_hash FROM {prefix}users WHERE id = ?1 AND deleted_at IS NULL"),
                [principal.user_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::SessionExpired)?;
        if !verify_password(old, &current)? {
            warn!(user_id = principal.user_id, "rejected password change");
            return Err(StoreError::InvalidCredentials);
        }

        let hash = hash_password(&self.hashing, new)?;
        self.scope.conn.execute(
            &format!("UPDATE {prefix}users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3"),
            params![hash, now(), principal.user_id],
        )?;
        debug!(user_id = principal.user_id, "password changed");
        Ok(())
    }

    /// Soft-deletes a user and revokes all of their sessions.
    ///
    /// Requires `users.deleted_at.w`.
    pub fn deactivate_user(&self, principal: &Principal, username: &str) -> Result<()> {
        let prefix = self.scope.prefix;

        let user_id = self.scope.write(|tx| {
            require(tx, prefix, principal, USERS_DELETE)?;
            let user_id: Option<UserId> = tx
                .query_row(
                    &format!("SELECT id FROM {prefix}users WHERE username = ?1 AND deleted_at IS NULL"),
                    [username],
                    |row| row.get(0),
                )
                .optional()?;
            let user_id = user_id.ok_or_else(|| StoreError::UserNotFound(username.to_string()))?;

            let at = now();
            tx.execute(
                &format!("UPDATE {prefix}users SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2"),
                params![at, user_id],
            )?;
            tx.execute(&format!("DELETE FROM {prefix}sessions WHERE user_id = ?1"), [user_id])?;
            events::append(
                tx,
                prefix,
                EventAction::UserDeactivate,
                Some(principal.user_id),
                Some(user_id),
                None,
            )?;
            Ok(user_id)
        })?;

        debug!(user_id = principal.user_id, target = user_id, "user deactivated");
        Ok(())
    }

    /// Grants a permission token to a role. Returns `false` if the role
    /// already held it.
    ///
    /// Requires `roles.w`.
    pub fn grant_permission(&self, principal: &Principal, role: &str, permission: &str) -> Result<bool> {
        let prefix = self.scope.prefix;

        let granted = self.scope.write(|tx| {
            require(tx, prefix, principal, ROLES_WRITE)?;
            if !is_valid_permission(permission) {
                return Err(StoreError::InvalidInput(format!("invalid permission '{permission}'")));
            }
            let role_id = find_role(tx, prefix, role)?;
            tx.execute(
                &format!("INSERT OR IGNORE INTO {prefix}permissions (name) VALUES (?1)"),
                [permission],
            )?;
            let inserted = tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO {prefix}role_permissions (role_id, permission_id)
                     SELECT ?1, id FROM {prefix}permissions WHERE name = ?2"
                ),
                params![role_id, permission],
            )?;
            if inserted > 0 {
                events::append(
                    tx,
                    prefix,
                    EventAction::PermissionGrant,
                    Some(principal.user_id),
                    Some(role_id),
                    Some(permission),
                )?;
            }
            Ok(inserted > 0)
        })?;

        debug!(user_id = principal.user_id, role, permission, granted, "permission granted");
        Ok(granted)
    }

    /// Revokes a permission token from a role. Returns `false` if the role
    /// did not hold it.
    ///
    /// Requires `roles.w`.
    pub fn revoke_permission(&self, principal: &Principal, role: &str, permission: &str) -> Result<bool> {
        let prefix = self.scope.prefix;

        let revoked = self.scope.write(|tx| {
            require(tx, prefix, principal, ROLES_WRITE)?;
            let role_id = find_role(tx, prefix, role)?;
            let removed = tx.execute(
                &format!(
                    "DELETE FROM {prefix}role_permissions WHERE role_id = ?1
                     AND permission_id = (SELECT id FROM {prefix}permissions WHERE name = ?2)"
                ),
                params![role_id, permission],
            )?;
            if removed > 0 {
                events::append(
                    tx,
                    prefix,
                    EventAction::PermissionRevoke,
                    Some(principal.user_id),
                    Some(role_id),
                    Some(permission),
                )?;
            }
            Ok(removed > 0)
        })?;

        debug!(user_id = principal.user_id, role, permission, revoked, "permission revoked");
        Ok(revoked)
    }

    /// Lists every user, deactivated ones included, in id order.
    ///
    /// Requires `users.r`.
    pub fn list_users(&self, principal: &Principal) -> Result<Vec<UserInfo>> {
        let prefix = self.scope.prefix;
        require(self.scope.conn, prefix, principal, USERS_READ)?;
        let mut stmt = self.scope.conn.prepare(&format!(
            "SELECT u.id, u.username, u.display_name, r.name, u.created_at, u.deleted_at
             FROM {prefix}users u JOIN {prefix}roles r ON r.id = u.role_id
             ORDER BY u.id"
        ))?;
        let users = stmt.query_map([], |row| {
            Ok(UserInfo {
                id: row.get(0)?,
                username: row.get(1)?,
                display_name: row.get(2)?,
                role: row.get(3)?,
                created_at: row.get(4)?,
                deleted_at: row.get(5)?,
            })
        })?;
        Ok(users.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn find_role(conn: &Connection, prefix: &str, role: &str) -> Result<i64> {
    conn.query_row(
        &format!("SELECT id FROM {prefix}roles WHERE name = ?1"),
        [role],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::RoleNotFound(role.to_string()))
}
