//! Core types for the invman inventory tracker.
//!
//! This crate holds everything that does not touch storage:
//!
//! - [`ColumnDefinition`] and [`ColumnType`]: one column of the dynamic
//!   inventory schema.
//! - [`FieldValue`]: a typed value of one entity field, with the canonical
//!   text form written to the transaction log.
//! - [`SchemaTransaction`], [`InventoryTransaction`] and [`Event`]: the
//!   append-only log records.
//! - [`PermissionSet`] and [`Principal`]: capability tokens resolved from a
//!   user's role.
//!
//! Validation ([`validate_definition`], [`coerce_value`]) enforces the
//! definition rules and field constraints. Replay ([`replay_schema`],
//! [`replay_entity`]) rebuilds live state from the logs.
//!
//! # Example
//!
//! ```
//! use invman_core::*;
//!
//! let qty = ColumnDefinition::new("qty", ColumnType::Int)
//!     .with_range(Some(0.0), None)
//!     .with_default("0");
//! assert!(validate_definition(&qty).is_empty());
//! assert_eq!(resolve_default(&qty, "now"), Ok(Some(FieldValue::Integer(0))));
//!
//! let clerk = Principal {
//!     user_id: 2,
//!     username: "clerk".into(),
//!     role_id: 2,
//!     role: "guest".into(),
//!     permissions: [INVENTORY_READ].into_iter().collect(),
//! };
//! assert!(clerk.authorize(INVENTORY_READ));
//! assert!(!clerk.authorize(SCHEMA_WRITE));
//! ```

mod permission;
mod replay;
mod types;
mod validate;

pub use permission::*;
pub use replay::{EntitySnapshot, ReplayError, ReplayedColumn, replay_entity, replay_schema};
pub use types::*;
pub use validate::{
    MAX_COLUMN_NAME_LEN, RESERVED_COLUMNS, ValidationError, coerce_value, resolve_default,
    validate_column_name, validate_definition,
};
