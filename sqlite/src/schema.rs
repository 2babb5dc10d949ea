//! SQL schema generation with customizable table prefixes.
//!
//! Generates the `CREATE TABLE` and `CREATE INDEX` statements of the
//! inventory store. All table names are prefixed with a configurable string
//! to allow multiple isolated stores in the same database.
//!
//! # Table structure
//!
//! - `{prefix}roles`, `{prefix}permissions`, `{prefix}role_permissions`:
//!   role based authorization
//! - `{prefix}users`: accounts with argon2 password hashes
//! - `{prefix}sessions`: SHA-256 digests of issued session tokens
//! - `{prefix}schema_transactions`: append-only log of column changes
//! - `{prefix}inventory_columns`: projection of the replayed column log
//! - `{prefix}inventory`: live entity rows, one physical column per column
//!   ever added
//! - `{prefix}inventory_transactions`: append-only log of field changes
//! - `{prefix}events`: append-only log of lifecycle actions
//! - `{prefix}config`: instance settings
//!
//! The physical inventory columns carry only a storage affinity; nullability,
//! uniqueness, bounds and defaults are enforced by the store so that column
//! definitions can change without rewriting constraints.

use invman_core::ColumnType;

use crate::error::{Result, StoreError};

/// Validates that a table prefix contains only alphanumeric characters and underscores.
pub(crate) fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(StoreError::InvalidPrefix(prefix.to_string()));
    }
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}

/// Quotes an identifier for use in SQL.
///
/// Column names are validated before they reach this point; quoting keeps
/// names that collide with SQL keywords (`order`, `group`) usable.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite storage affinity of a column type.
pub(crate) fn affinity(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Text | ColumnType::Varchar => "TEXT",
        ColumnType::Int | ColumnType::Bool => "INTEGER",
        ColumnType::Real => "REAL",
    }
}

/// Generates the complete SQL schema for all tables with the given prefix.
///
/// # Errors
///
/// Returns [`StoreError::InvalidPrefix`] if the prefix contains characters
/// other than alphanumerics and underscores, or if it is empty.
pub fn generate_schema_sql(prefix: &str) -> Result<String> {
    validate_prefix(prefix)?;

    let sql = format!(
        r#"
CREATE TABLE IF NOT EXISTS {prefix}roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
);

CREATE TABLE IF NOT EXISTS {prefix}permissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS {prefix}role_permissions (
    role_id INTEGER NOT NULL REFERENCES {prefix}roles(id) ON DELETE CASCADE,
    permission_id INTEGER NOT NULL REFERENCES {prefix}permissions(id) ON DELETE CASCADE,
    PRIMARY KEY (role_id, permission_id)
);

CREATE TABLE IF NOT EXISTS {prefix}users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    display_name TEXT,
    role_id INTEGER NOT NULL REFERENCES {prefix}roles(id),
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS {prefix}sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token_hash TEXT NOT NULL UNIQUE,
    user_id INTEGER NOT NULL REFERENCES {prefix}users(id),
    created_at TEXT NOT NULL,
    valid_until TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS {prefix}schema_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dispatcher INTEGER NOT NULL REFERENCES {prefix}users(id),
    column_name TEXT NOT NULL,
    action_no INTEGER NOT NULL CHECK (action_no IN (1, 2, 3)),
    seq INTEGER NOT NULL,
    from_val TEXT,
    to_val TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (column_name, seq)
);

CREATE TABLE IF NOT EXISTS {prefix}inventory_columns (
    name TEXT PRIMARY KEY,
    definition TEXT NOT NULL,
    position INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    schema_id INTEGER NOT NULL REFERENCES {prefix}schema_transactions(id)
);

CREATE TABLE IF NOT EXISTS {prefix}inventory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS {prefix}inventory_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dispatcher INTEGER NOT NULL REFERENCES {prefix}users(id),
    schema_id INTEGER REFERENCES {prefix}schema_transactions(id),
    inventory_id INTEGER NOT NULL,
    field TEXT,
    action_no INTEGER NOT NULL CHECK (action_no IN (1, 2, 3)),
    seq INTEGER NOT NULL,
    from_val TEXT,
    to_val TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS {prefix}events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action_no INTEGER NOT NULL,
    dispatcher INTEGER REFERENCES {prefix}users(id),
    target INTEGER,
    reason TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS {prefix}config (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_{prefix}users_role ON {prefix}users(role_id);
CREATE INDEX IF NOT EXISTS idx_{prefix}sessions_user ON {prefix}sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_{prefix}schema_transactions_column ON {prefix}schema_transactions(column_name, id);
CREATE INDEX IF NOT EXISTS idx_{prefix}inventory_transactions_entity ON {prefix}inventory_transactions(inventory_id, id);
CREATE INDEX IF NOT EXISTS idx_{prefix}events_action ON {prefix}events(action_no, id);
{inventory_index}
"#,
        prefix = prefix,
        inventory_index = inventory_index_sql(prefix),
    );

    Ok(sql)
}

/// Generates the seed rows: the `admin` and `guest` roles, the wildcard
/// permission granted to `admin`, and the default instance settings.
///
/// Uses `INSERT OR IGNORE` so re-running never overwrites changed settings.
pub fn generate_seed_sql(prefix: &str) -> Result<String> {
    validate_prefix(prefix)?;

    let sql = format!(
        r#"
INSERT OR IGNORE INTO {prefix}roles (id, name) VALUES (1, 'admin');
INSERT OR IGNORE INTO {prefix}roles (id, name) VALUES (2, 'guest');
INSERT OR IGNORE INTO {prefix}permissions (name) VALUES ('*');
INSERT OR IGNORE INTO {prefix}role_permissions (role_id, permission_id)
    SELECT 1, id FROM {prefix}permissions WHERE name = '*';
INSERT OR IGNORE INTO {prefix}config (name, value, updated_at)
    VALUES ('allow_registration', 'true', strftime('%Y-%m-%d %H:%M:%f', 'now'));
INSERT OR IGNORE INTO {prefix}config (name, value, updated_at)
    VALUES ('session_ttl_secs', '86400', strftime('%Y-%m-%d %H:%M:%f', 'now'));
"#,
        prefix = prefix
    );

    Ok(sql)
}

/// Generates `DROP TABLE` statements for all tables in reverse dependency order.
pub fn generate_drop_sql(prefix: &str) -> Result<String> {
    validate_prefix(prefix)?;

    let sql = format!(
        r#"
DROP TABLE IF EXISTS {prefix}config;
DROP TABLE IF EXISTS {prefix}events;
DROP TABLE IF EXISTS {prefix}inventory_transactions;
DROP TABLE IF EXISTS {prefix}inventory;
DROP TABLE IF EXISTS {prefix}inventory_columns;
DROP TABLE IF EXISTS {prefix}schema_transactions;
DROP TABLE IF EXISTS {prefix}sessions;
DROP TABLE IF EXISTS {prefix}users;
DROP TABLE IF EXISTS {prefix}role_permissions;
DROP TABLE IF EXISTS {prefix}permissions;
DROP TABLE IF EXISTS {prefix}roles;
"#,
        prefix = prefix
    );

    Ok(sql)
}

/// `ALTER TABLE` adding one physical inventory column.
pub(crate) fn add_column_sql(prefix: &str, name: &str, column_type: ColumnType) -> String {
    format!(
        "ALTER TABLE {prefix}inventory ADD COLUMN {} {}",
        quote_ident(name),
        affinity(column_type)
    )
}

/// Rebuilds the inventory table with new column affinities.
///
/// `columns` lists every physical data column in table order with the type
/// it should have afterwards. Ids and values are copied as-is; callers
/// re-encode values whose type changed.
pub(crate) fn rebuild_inventory_sql(prefix: &str, columns: &[(String, ColumnType)]) -> String {
    let defs: String = columns
        .iter()
        .map(|(name, ty)| format!(",\n    {} {}", quote_ident(name), affinity(*ty)))
        .collect();
    let names: String = columns
        .iter()
        .map(|(name, _)| format!(", {}", quote_ident(name)))
        .collect();

    format!(
        r#"
CREATE TABLE {prefix}inventory_rebuild (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT{defs}
);
INSERT INTO {prefix}inventory_rebuild (id, created_at, updated_at, deleted_at{names})
    SELECT id, created_at, updated_at, deleted_at{names} FROM {prefix}inventory;
DROP TABLE {prefix}inventory;
ALTER TABLE {prefix}inventory_rebuild RENAME TO {prefix}inventory;
{index}
"#,
        index = inventory_index_sql(prefix),
    )
}

fn inventory_index_sql(prefix: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS idx_{prefix}inventory_deleted_at ON {prefix}inventory(deleted_at);"
    )
}
