//! SQLite storage for the invman inventory tracker.
//!
//! This crate keeps a user-defined inventory table whose columns are
//! versioned through an append-only schema log, records every field change
//! in an append-only inventory log, and guards all of it behind
//! permission-checked sessions.
//!
//! # Architecture
//!
//! - **`schema`**: SQL generation with customizable table prefixes
//! - **`migration`**: lifecycle operations (up/down/status)
//! - **`store`**: the [`Inventory`] facade owning the connection
//! - **`identity`** / **`session`**: users, roles, password hashing and tokens
//! - **`registry`**: the versioned column schema and its projection
//! - **`entity`**: inventory rows and their field-level history
//! - **`events`** / **`settings`**: the lifecycle event log and instance settings
//! - **`integrity`**: replaying the logs against the live tables
//! - **`cursor`**: keyset-paged lazy listings
//!
//! # Quick start
//!
//! ```no_run
//! use invman_core::{ColumnDefinition, ColumnType};
//! use invman_sqlite::{Inventory, SchemaChange, StoreOptions};
//!
//! let inv = Inventory::open("inventory.db", StoreOptions::default()).unwrap();
//! let session = inv.identity().authenticate("admin", "secret").unwrap();
//! let admin = inv.sessions().validate_session(&session.token).unwrap();
//!
//! inv.registry()
//!     .apply_schema_change(&admin, SchemaChange::Add(ColumnDefinition::new("qty", ColumnType::Int)))
//!     .unwrap();
//! for entity in inv.entities().list_entities(&admin, Default::default()).unwrap() {
//!     println!("{:?}", entity.unwrap());
//! }
//! ```
//!
//! # Table prefix customization
//!
//! All table and index names are prefixed with a configurable string, so
//! several isolated inventories can share one SQLite database. Prefixes must
//! contain only alphanumeric characters and underscores.

mod convert;
mod cursor;
mod entity;
mod error;
mod events;
mod identity;
mod integrity;
mod migration;
mod password;
mod registry;
mod schema;
mod session;
mod settings;
mod store;

pub use cursor::{Keyed, Paged};
pub use entity::{EntityQuery, EntityStore, RawFilter};
pub use error::{Result, StoreError};
pub use events::EventLog;
pub use identity::{ADMIN_ROLE_ID, GUEST_ROLE_ID, IdentityStore, UserInfo, authorize};
pub use integrity::IntegrityReport;
pub use migration::{Migration, MigrationStatus};
pub use password::HashingParams;
pub use registry::{SchemaChange, SchemaRegistry, SchemaVersion};
pub use schema::{generate_drop_sql, generate_schema_sql, generate_seed_sql};
pub use session::{IssuedSession, SessionStore};
pub use settings::{ALLOW_REGISTRATION, SESSION_TTL_SECS, Setting, Settings};
pub use store::{Inventory, StoreOptions};
