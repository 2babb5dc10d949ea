//! The [`Inventory`] facade and the shared scope handed to each store.
//!
//! An [`Inventory`] owns one SQLite connection. The component stores it
//! hands out ([`IdentityStore`], [`SessionStore`], [`SchemaRegistry`],
//! [`EntityStore`], [`EventLog`], [`Settings`]) borrow that connection, so
//! several isolated instances can live side by side in one process.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::entity::EntityStore;
use crate::error::Result;
use crate::events::EventLog;
use crate::identity::IdentityStore;
use crate::integrity::{self, IntegrityReport};
use crate::migration::Migration;
use crate::password::HashingParams;
use crate::registry::SchemaRegistry;
use crate::schema::validate_prefix;
use crate::session::SessionStore;
use crate::settings::Settings;

/// Options applied when opening an [`Inventory`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Prefix of every table name.
    pub prefix: String,
    /// Rows fetched per page by lazy listings.
    pub page_size: u32,
    /// How long a writer waits for a competing lock.
    pub busy_timeout: Duration,
    /// Cost parameters for new password hashes.
    pub hashing: HashingParams,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            prefix: "invman_".to_string(),
            page_size: 256,
            busy_timeout: Duration::from_millis(5_000),
            hashing: HashingParams::default(),
        }
    }
}

/// Connection, prefix and paging shared by the component stores.
#[derive(Clone, Copy)]
pub(crate) struct Scope<'a> {
    pub(crate) conn: &'a Connection,
    pub(crate) prefix: &'a str,
    pub(crate) page_size: u32,
}

impl Scope<'_> {
    /// Runs `f` inside one `BEGIN IMMEDIATE` transaction, committing on
    /// success and rolling back on any error.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// An opened inventory database.
///
/// # Examples
///
/// ```
/// use invman_core::{ColumnDefinition, ColumnType, FieldValue};
/// use invman_sqlite::{Inventory, SchemaChange, StoreOptions};
///
/// let inv = Inventory::open_in_memory(StoreOptions::default()).unwrap();
/// inv.identity().register("admin", "secret").unwrap();
/// let session = inv.identity().authenticate("admin", "secret").unwrap();
/// let admin = inv.sessions().validate_session(&session.token).unwrap();
///
/// inv.registry()
///     .apply_schema_change(&admin, SchemaChange::Add(ColumnDefinition::new("name", ColumnType::Text)))
///     .unwrap();
/// let id = inv
///     .entities()
///     .create_entity(&admin, vec![("name".into(), FieldValue::from("bolt"))])
///     .unwrap();
/// let entity = inv.entities().get_entity(&admin, id).unwrap();
/// assert_eq!(entity.get("name"), Some(&FieldValue::from("bolt")));
/// ```
pub struct Inventory {
    conn: Connection,
    options: StoreOptions,
}

impl Inventory {
    /// Opens (creating if needed) a database file and migrates it.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, options)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(options: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, options)
    }

    /// Wraps an existing connection, applying the busy timeout and running
    /// the idempotent migration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPrefix`](crate::StoreError::InvalidPrefix)
    /// for a bad prefix, or a migration error if the tables cannot be created.
    pub fn from_connection(conn: Connection, options: StoreOptions) -> Result<Self> {
        validate_prefix(&options.prefix)?;
        conn.busy_timeout(options.busy_timeout)?;
        let mut migration = Migration::new(conn, options.prefix.clone())?;
        migration.up()?;
        Ok(Self {
            conn: migration.into_connection(),
            options,
        })
    }

    pub(crate) fn scope(&self) -> Scope<'_> {
        Scope {
            conn: &self.conn,
            prefix: &self.options.prefix,
            page_size: self.options.page_size,
        }
    }

    /// Users, roles and authentication.
    pub fn identity(&self) -> IdentityStore<'_> {
        IdentityStore::new(self.scope(), self.options.hashing)
    }

    /// Session validation and revocation.
    pub fn sessions(&self) -> SessionStore<'_> {
        SessionStore::new(self.scope())
    }

    /// The versioned column schema.
    pub fn registry(&self) -> SchemaRegistry<'_> {
        SchemaRegistry::new(self.scope())
    }

    /// Inventory rows and their history.
    pub fn entities(&self) -> EntityStore<'_> {
        EntityStore::new(self.scope())
    }

    /// The lifecycle event log.
    pub fn events(&self) -> EventLog<'_> {
        EventLog::new(self.scope())
    }

    /// Instance settings.
    pub fn settings(&self) -> Settings<'_> {
        Settings::new(self.scope())
    }

    /// Replays every log and compares it with the live tables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageCorrupt`](crate::StoreError::StorageCorrupt)
    /// describing the first discrepancy found.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        integrity::verify(self.scope())
    }

    /// Returns a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }
}
