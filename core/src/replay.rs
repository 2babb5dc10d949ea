//! Pure replay of the transaction logs.
//!
//! The logs are the source of truth; the live inventory table and the
//! column projection are caches of them. These functions rebuild the
//! expected live state from a log so a backend can check that its caches
//! never diverge.
//!
//! Column order is defined by the id of the transaction that most recently
//! (re-)added the column: edits keep a column's position, a column added
//! again after removal moves to the end.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{ColumnDefinition, EntityAction, InventoryTransaction, SchemaAction, SchemaTransaction};

/// A log that cannot be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// ADD for a column that is already live.
    #[error("transaction {id}: column '{column}' added while already live")]
    DuplicateAdd { id: i64, column: String },
    /// EDIT or REMOVE for a column that is not live.
    #[error("transaction {id}: column '{column}' is not live")]
    NotLive { id: i64, column: String },
    /// Definition payload missing or naming another column.
    #[error("transaction {id}: malformed definition for column '{column}'")]
    MalformedDefinition { id: i64, column: String },
    /// Transactions are not in ascending id order.
    #[error("transaction {id} is out of order")]
    OutOfOrder { id: i64 },
}

/// A column as reconstructed by [`replay_schema`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedColumn {
    pub definition: ColumnDefinition,
    /// Id of the transaction that (re-)added the column.
    pub position: i64,
    /// Id of the transaction that last defined the column.
    pub schema_id: i64,
}

/// Replays a schema log into the set of live columns, in position order.
///
/// # Examples
///
/// ```
/// use invman_core::*;
///
/// let def = ColumnDefinition::new("weight", ColumnType::Real);
/// let log = vec![
///     SchemaTransaction {
///         id: 1, dispatcher: 1, column: "weight".into(), action: SchemaAction::Add,
///         seq: 1, from_val: None, to_val: Some(def.clone()), created_at: String::new(),
///     },
///     SchemaTransaction {
///         id: 2, dispatcher: 1, column: "weight".into(), action: SchemaAction::Remove,
///         seq: 2, from_val: Some(def), to_val: None, created_at: String::new(),
///     },
/// ];
/// assert!(replay_schema(&log).unwrap().is_empty());
/// assert_eq!(replay_schema(&log[..1]).unwrap().len(), 1);
/// ```
pub fn replay_schema<'a, I>(history: I) -> Result<Vec<ReplayedColumn>, ReplayError>
where
    I: IntoIterator<Item = &'a SchemaTransaction>,
{
    let mut live: BTreeMap<String, ReplayedColumn> = BTreeMap::new();
    let mut last_id = i64::MIN;

    for tx in history {
        if tx.id <= last_id {
            return Err(ReplayError::OutOfOrder { id: tx.id });
        }
        last_id = tx.id;

        let malformed = || ReplayError::MalformedDefinition {
            id: tx.id,
            column: tx.column.clone(),
        };

        match tx.action {
            SchemaAction::Add => {
                let def = tx.to_val.as_ref().filter(|d| d.name == tx.column).ok_or_else(malformed)?;
                if live.contains_key(&tx.column) {
                    return Err(ReplayError::DuplicateAdd {
                        id: tx.id,
                        column: tx.column.clone(),
                    });
                }
                live.insert(
                    tx.column.clone(),
                    ReplayedColumn {
                        definition: def.clone(),
                        position: tx.id,
                        schema_id: tx.id,
                    },
                );
            }
            SchemaAction::Edit => {
                let def = tx.to_val.as_ref().filter(|d| d.name == tx.column).ok_or_else(malformed)?;
                let column = live.get_mut(&tx.column).ok_or_else(|| ReplayError::NotLive {
                    id: tx.id,
                    column: tx.column.clone(),
                })?;
                column.definition = def.clone();
                column.schema_id = tx.id;
            }
            SchemaAction::Remove => {
                if tx.to_val.is_some() {
                    return Err(malformed());
                }
                if live.remove(&tx.column).is_none() {
                    return Err(ReplayError::NotLive {
                        id: tx.id,
                        column: tx.column.clone(),
                    });
                }
            }
        }
    }

    let mut columns: Vec<ReplayedColumn> = live.into_values().collect();
    columns.sort_by_key(|c| c.position);
    Ok(columns)
}

/// The state of one entity as reconstructed by [`replay_entity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySnapshot {
    /// Latest canonical value per field ever written.
    pub fields: BTreeMap<String, Option<String>>,
    /// Whether a DELETE was recorded.
    pub deleted: bool,
    /// Whether a CREATE was recorded.
    pub created: bool,
}

impl EntitySnapshot {
    /// Canonical value of a field; `None` when it was never written or is NULL.
    pub fn value(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }
}

/// Replays an entity's history, field by field.
///
/// The transactions must belong to one entity and be ordered by id.
pub fn replay_entity<'a, I>(history: I) -> EntitySnapshot
where
    I: IntoIterator<Item = &'a InventoryTransaction>,
{
    let mut snapshot = EntitySnapshot::default();
    for tx in history {
        match tx.action {
            EntityAction::Create => snapshot.created = true,
            EntityAction::Delete => snapshot.deleted = true,
            EntityAction::Update => {}
        }
        if let Some(field) = &tx.field {
            snapshot.fields.insert(field.clone(), tx.to_val.clone());
        }
    }
    snapshot
}
