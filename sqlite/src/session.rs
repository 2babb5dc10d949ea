//! Time-bounded session tokens.
//!
//! A token is 32 random bytes, hex encoded, handed to the caller exactly
//! once. Only its SHA-256 digest is stored.

use chrono::{TimeDelta, Utc};
use invman_core::{Principal, UserId};
use password_hash::rand_core::{OsRng, RngCore};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::convert::{now, timestamp};
use crate::error::{Result, StoreError};
use crate::identity::load_principal;
use crate::settings;
use crate::store::Scope;

/// A freshly issued session. The token is not stored anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub user_id: UserId,
    pub valid_until: String,
}

/// SHA-256 digest of a token, as stored.
pub(crate) fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Issues a session for `user_id`, valid for the configured lifetime.
pub(crate) fn issue(conn: &Connection, prefix: &str, user_id: UserId) -> Result<IssuedSession> {
    let ttl = settings::session_ttl_secs(conn, prefix)?;
    let created = Utc::now();
    let expires = i64::try_from(ttl)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| created.checked_add_signed(ttl))
        .ok_or_else(|| StoreError::InvalidInput(format!("session lifetime of {ttl}s is out of range")))?;

    let token = generate_token();
    let valid_until = timestamp(expires);
    conn.execute(
        &format!(
            "INSERT INTO {prefix}sessions (token_hash, user_id, created_at, valid_until)
             VALUES (?1, ?2, ?3, ?4)"
        ),
        params![token_digest(&token), user_id, timestamp(created), valid_until],
    )?;
    Ok(IssuedSession {
        token,
        user_id,
        valid_until,
    })
}

/// Validation and revocation of issued sessions.
pub struct SessionStore<'a> {
    scope: Scope<'a>,
}

impl<'a> SessionStore<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Resolves a token to the principal it was issued for.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SessionExpired`] when the token is unknown,
    /// past its expiry, or belongs to a deactivated user.
    pub fn validate_session(&self, token: &str) -> Result<Principal> {
        let prefix = self.scope.prefix;
        let user_id: Option<UserId> = self
            .scope
            .conn
            .query_row(
                &format!(
                    "SELECT s.user_id FROM {prefix}sessions s
                     JOIN {prefix}users u ON u.id = s.user_id
                     WHERE s.token_hash = ?1 AND s.valid_until > ?2 AND u.deleted_at IS NULL"
                ),
                params![token_digest(token), now()],
                |row| row.get(0),
            )
            .optional()?;
        let user_id = user_id.ok_or(StoreError::SessionExpired)?;
        load_principal(self.scope.conn, prefix, user_id)
    }

    /// Revokes a session. Revoking an unknown token is not an error.
    pub fn revoke_session(&self, token: &str) -> Result<()> {
        let prefix = self.scope.prefix;
        let removed = self.scope.conn.execute(
            &format!("DELETE FROM {prefix}sessions WHERE token_hash = ?1"),
            [token_digest(token)],
        )?;
        debug!(removed, "session revoked");
        Ok(())
    }

    /// Deletes every expired session and returns how many were removed.
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        let prefix = self.scope.prefix;
        let removed = self.scope.conn.execute(
            &format!("DELETE FROM {prefix}sessions WHERE valid_until <= ?1"),
            [now()],
        )?;
        debug!(removed, "expired sessions purged");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_random_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_is_stable_sha256() {
        assert_eq!(
            token_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
