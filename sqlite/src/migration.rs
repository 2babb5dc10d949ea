//! Migration lifecycle operations for the inventory tables.
//!
//! [`Migration`] creates, seeds and drops the prefixed table set. `up` and
//! `down` each run in a single transaction.
//!
//! # Example
//!
//! ```no_run
//! use invman_sqlite::Migration;
//! use rusqlite::Connection;
//!
//! let conn = Connection::open("inventory.db")?;
//! let mut migration = Migration::new(conn, "invman_")?;
//!
//! migration.up()?;
//! let status = migration.status()?;
//! println!("{} users, {} live columns", status.user_count, status.column_count);
//! # Ok::<(), invman_sqlite::StoreError>(())
//! ```

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::schema::{generate_drop_sql, generate_schema_sql, generate_seed_sql, validate_prefix};

/// Manages the lifecycle of the inventory tables.
///
/// [`up`](Self::up) creates the tables and seeds the default roles and
/// settings; it is idempotent and runs every time an
/// [`Inventory`](crate::Inventory) is opened. [`down`](Self::down) drops
/// everything, logs included.
pub struct Migration {
    conn: Connection,
    prefix: String,
}

impl Migration {
    /// Wraps `conn` for the tables named `{prefix}…` and enables foreign keys.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPrefix`] if the prefix contains invalid characters.
    pub fn new(conn: Connection, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn, prefix })
    }

    /// Creates all tables and indexes, then inserts the seed rows.
    ///
    /// Uses `CREATE TABLE IF NOT EXISTS` and `INSERT OR IGNORE` so it is
    /// safe to call multiple times.
    pub fn up(&mut self) -> Result<()> {
        let create = generate_schema_sql(&self.prefix)?;
        let seed = generate_seed_sql(&self.prefix)?;
        let tx = self.conn.transaction()?;
        tx.execute_batch(&create)
            .map_err(|e| StoreError::MigrationError(format!("failed to create tables: {e}")))?;
        tx.execute_batch(&seed)
            .map_err(|e| StoreError::MigrationError(format!("failed to seed tables: {e}")))?;
        tx.commit()?;
        Ok(())
    }

    /// Drops every table, children before parents. Missing tables are
    /// ignored.
    pub fn down(&mut self) -> Result<()> {
        let sql = generate_drop_sql(&self.prefix)?;
        let tx = self.conn.transaction()?;
        tx.execute_batch(&sql)
            .map_err(|e| StoreError::MigrationError(format!("failed to drop tables: {e}")))?;
        tx.commit()?;
        Ok(())
    }

    /// Reports whether the tables exist and how many rows the main ones hold.
    pub fn status(&self) -> Result<MigrationStatus> {
        if !self.tables_exist()? {
            return Ok(MigrationStatus::default());
        }

        Ok(MigrationStatus {
            tables_exist: true,
            user_count: self.count_rows("users")?,
            column_count: self.count_where("inventory_columns", "active = 1")?,
            entity_count: self.count_where("inventory", "deleted_at IS NULL")?,
            schema_transaction_count: self.count_rows("schema_transactions")?,
            inventory_transaction_count: self.count_rows("inventory_transactions")?,
            event_count: self.count_rows("events")?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Hands the connection back, e.g. to build an [`Inventory`](crate::Inventory).
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Checks whether every table exists.
    fn tables_exist(&self) -> Result<bool> {
        let tables = [
            "roles",
            "permissions",
            "role_permissions",
            "users",
            "sessions",
            "schema_transactions",
            "inventory_columns",
            "inventory",
            "inventory_transactions",
            "events",
            "config",
        ];
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1")?;
        for table in tables {
            let count: i64 = stmt.query_row([format!("{}{}", self.prefix, table)], |row| row.get(0))?;
            if count == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn count_rows(&self, table: &str) -> Result<usize> {
        self.count_where(table, "1")
    }

    fn count_where(&self, table: &str, condition: &str) -> Result<usize> {
        let prefix = &self.prefix;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {prefix}{table} WHERE {condition}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Snapshot returned by [`Migration::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MigrationStatus {
    /// Whether every table exists.
    pub tables_exist: bool,
    pub user_count: usize,
    /// Live (non-removed) columns.
    pub column_count: usize,
    /// Live (not soft-deleted) entities.
    pub entity_count: usize,
    pub schema_transaction_count: usize,
    pub inventory_transaction_count: usize,
    pub event_count: usize,
}
