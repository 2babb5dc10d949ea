//! Instance settings stored in the `config` table.
//!
//! Settings are unique name/value pairs; `updated_at` is refreshed on every
//! write. Two settings are understood by the store itself and validated on
//! write: [`ALLOW_REGISTRATION`] and [`SESSION_TTL_SECS`].

use invman_core::{CONFIG_WRITE, EventAction, Principal};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

use crate::convert::now;
use crate::error::{Result, StoreError};
use crate::events;
use crate::identity::require;
use crate::store::Scope;

/// `true`/`false`: whether [`register`](crate::IdentityStore::register) accepts new users.
pub const ALLOW_REGISTRATION: &str = "allow_registration";

/// Lifetime of new sessions in seconds.
pub const SESSION_TTL_SECS: &str = "session_ttl_secs";

const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;

/// One stored setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Setting {
    pub name: String,
    pub value: String,
    pub updated_at: String,
}

fn read_value(conn: &Connection, prefix: &str, name: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            &format!("SELECT value FROM {prefix}config WHERE name = ?1"),
            [name],
            |row| row.get(0),
        )
        .optional()?)
}

/// Whether registration is open; defaults to open when unset.
pub(crate) fn registration_allowed(conn: &Connection, prefix: &str) -> Result<bool> {
    Ok(read_value(conn, prefix, ALLOW_REGISTRATION)?.is_none_or(|v| v == "true"))
}

/// Session lifetime in seconds.
pub(crate) fn session_ttl_secs(conn: &Connection, prefix: &str) -> Result<u64> {
    match read_value(conn, prefix, SESSION_TTL_SECS)? {
        None => Ok(DEFAULT_SESSION_TTL_SECS),
        Some(raw) => raw.parse().map_err(|_| {
            StoreError::StorageCorrupt(format!("setting {SESSION_TTL_SECS} is not a number: '{raw}'"))
        }),
    }
}

fn validate_setting(name: &str, value: &str) -> Result<()> {
    let name_ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !name_ok {
        return Err(StoreError::InvalidInput(format!(
            "setting name '{name}' must use lowercase letters, digits and underscores"
        )));
    }
    match name {
        ALLOW_REGISTRATION if value != "true" && value != "false" => Err(StoreError::InvalidInput(
            format!("{ALLOW_REGISTRATION} must be 'true' or 'false'"),
        )),
        SESSION_TTL_SECS if value.parse::<u64>().map_or(true, |secs| secs == 0) => Err(
            StoreError::InvalidInput(format!("{SESSION_TTL_SECS} must be a positive number of seconds")),
        ),
        _ => Ok(()),
    }
}

/// Access to instance settings.
pub struct Settings<'a> {
    scope: Scope<'a>,
}

impl<'a> Settings<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Returns one setting, if it exists.
    pub fn get_setting(&self, name: &str) -> Result<Option<Setting>> {
        let prefix = self.scope.prefix;
        Ok(self
            .scope
            .conn
            .query_row(
                &format!("SELECT name, value, updated_at FROM {prefix}config WHERE name = ?1"),
                [name],
                |row| {
                    Ok(Setting {
                        name: row.get(0)?,
                        value: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Returns every setting ordered by name.
    pub fn list_settings(&self) -> Result<Vec<Setting>> {
        let prefix = self.scope.prefix;
        let mut stmt = self
            .scope
            .conn
            .prepare(&format!("SELECT name, value, updated_at FROM {prefix}config ORDER BY name"))?;
        let rows = stmt.query_map([], |row| {
            Ok(Setting {
                name: row.get(0)?,
                value: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Creates or replaces a setting.
    ///
    /// Requires `config.w`. Appends a `CONFIG_SET` event.
    pub fn set_setting(&self, principal: &Principal, name: &str, value: &str) -> Result<()> {
        let prefix = self.scope.prefix;
        self.scope.write(|tx| {
            require(tx, prefix, principal, CONFIG_WRITE)?;
            validate_setting(name, value)?;
            tx.execute(
                &format!(
                    "INSERT INTO {prefix}config (name, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"
                ),
                params![name, value, now()],
            )?;
            events::append(
                tx,
                prefix,
                EventAction::ConfigSet,
                Some(principal.user_id),
                None,
                Some(&format!("{name}={value}")),
            )?;
            Ok(())
        })?;

        debug!(user_id = principal.user_id, setting = name, "setting updated");
        Ok(())
    }
}
