//! The versioned inventory schema.
//!
//! Every column change is appended to `schema_transactions`; the
//! `inventory_columns` projection caches the replayed result and the
//! physical `inventory` table carries one column per name ever added.
//! All three are written in one transaction.
//!
//! Removal is logical: the projection row is marked inactive and the
//! physical column keeps its data, so the entity history stays replayable
//! and a later ADD of the same name reactivates it. A reactivated column
//! moves to the end of the column order.

use std::collections::{HashMap, HashSet};

use invman_core::{
    ColumnDefinition, ColumnType, EventAction, FieldValue, Principal, SCHEMA_WRITE, SchemaAction,
    SchemaTransaction, coerce_value, validate_definition,
};
use rusqlite::types::Value;
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::debug;

use crate::convert::{
    SCHEMA_TX_COLUMNS, decode_definition, encode_definition, field_from_sql, field_to_sql, now,
    schema_tx_from_row,
};
use crate::cursor::Paged;
use crate::error::{Result, StoreError};
use crate::events;
use crate::identity::require;
use crate::schema::{add_column_sql, affinity, quote_ident, rebuild_inventory_sql};
use crate::store::Scope;

/// Bookkeeping columns of the inventory table.
const BOOKKEEPING: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

/// One requested alteration of the inventory schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    /// Add a column, or reactivate a removed one with a new definition.
    Add(ColumnDefinition),
    /// Replace the definition of a live column.
    Edit(ColumnDefinition),
    /// Logically remove a live column.
    Remove(String),
}

impl SchemaChange {
    /// Name of the column the change targets.
    pub fn column(&self) -> &str {
        match self {
            Self::Add(def) | Self::Edit(def) => &def.name,
            Self::Remove(name) => name,
        }
    }

    pub fn action(&self) -> SchemaAction {
        match self {
            Self::Add(_) => SchemaAction::Add,
            Self::Edit(_) => SchemaAction::Edit,
            Self::Remove(_) => SchemaAction::Remove,
        }
    }
}

/// The schema transaction written by an accepted change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaVersion {
    pub id: i64,
    pub column: String,
    pub action: SchemaAction,
    pub seq: i64,
}

/// A live column together with the schema transaction that defined it.
#[derive(Debug, Clone)]
pub(crate) struct LiveColumn {
    pub(crate) definition: ColumnDefinition,
    pub(crate) schema_id: i64,
}

/// One row of the column projection, active or not.
#[derive(Debug, Clone)]
pub(crate) struct ProjectedColumn {
    pub(crate) definition: ColumnDefinition,
    pub(crate) position: i64,
    pub(crate) active: bool,
    pub(crate) schema_id: i64,
}

/// Reads the whole projection keyed by column name.
pub(crate) fn projection(conn: &Connection, prefix: &str) -> Result<HashMap<String, ProjectedColumn>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT name, definition, position, active, schema_id FROM {prefix}inventory_columns"
    ))?;
    let mut rows = stmt.query([])?;
    let mut columns = HashMap::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let json: String = row.get(1)?;
        let definition = decode_definition(&json)?;
        if definition.name != name {
            return Err(StoreError::StorageCorrupt(format!(
                "projection row '{name}' holds the definition of '{}'",
                definition.name
            )));
        }
        columns.insert(
            name,
            ProjectedColumn {
                definition,
                position: row.get(2)?,
                active: row.get(3)?,
                schema_id: row.get(4)?,
            },
        );
    }
    Ok(columns)
}

/// Data columns of the physical inventory table, in table order.
pub(crate) fn physical_columns(conn: &Connection, prefix: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let names = stmt
        .query_map([format!("{prefix}inventory")], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names
        .into_iter()
        .filter(|name| !BOOKKEEPING.contains(&name.as_str()))
        .collect())
}

/// Live columns in position order, each checked against the log entry it
/// cites and against the physical table.
pub(crate) fn live_columns(conn: &Connection, prefix: &str) -> Result<Vec<LiveColumn>> {
    let physical: HashSet<String> = physical_columns(conn, prefix)?.into_iter().collect();
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT c.name, c.definition, c.schema_id, t.column_name, t.action_no, t.to_val
         FROM {prefix}inventory_columns c
         LEFT JOIN {prefix}schema_transactions t ON t.id = c.schema_id
         WHERE c.active = 1
         ORDER BY c.position"
    ))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let definition = decode_definition(&row.get::<_, String>(1)?)?;
        let schema_id: i64 = row.get(2)?;
        let cited_column: Option<String> = row.get(3)?;
        let cited_action: Option<i64> = row.get(4)?;
        let cited_definition: Option<String> = row.get(5)?;

        let cited = match (cited_column, cited_action, cited_definition) {
            (Some(column), Some(1 | 2), Some(json)) if column == name => Some(decode_definition(&json)?),
            _ => None,
        };
        if cited.as_ref() != Some(&definition) || definition.name != name {
            return Err(StoreError::StorageCorrupt(format!(
                "column '{name}' does not match schema transaction {schema_id}"
            )));
        }
        if !physical.contains(&name) {
            return Err(StoreError::StorageCorrupt(format!(
                "column '{name}' is missing from the inventory table"
            )));
        }
        columns.push(LiveColumn {
            definition,
            schema_id,
        });
    }
    Ok(columns)
}

fn next_seq(conn: &Connection, prefix: &str, column: &str) -> Result<i64> {
    Ok(conn.query_row(
        &format!("SELECT COALESCE(MAX(seq), 0) + 1 FROM {prefix}schema_transactions WHERE column_name = ?1"),
        [column],
        |row| row.get(0),
    )?)
}

fn count_live_entities(conn: &Connection, prefix: &str) -> Result<i64> {
    Ok(conn.query_row(
        &format!("SELECT COUNT(*) FROM {prefix}inventory WHERE deleted_at IS NULL"),
        [],
        |row| row.get(0),
    )?)
}

/// Checks that every value retained in `column` survives the move from
/// `old` to `new` unchanged in canonical form, and that live entities
/// satisfy the new constraints. Returns the re-typed non-NULL values.
fn check_retained(
    conn: &Connection,
    prefix: &str,
    old: &ColumnDefinition,
    new: &ColumnDefinition,
) -> Result<Vec<(i64, FieldValue)>> {
    let column = new.name.as_str();
    let mut stmt = conn.prepare(&format!(
        "SELECT id, {}, deleted_at IS NULL FROM {prefix}inventory ORDER BY id",
        quote_ident(column)
    ))?;
    let mut rows = stmt.query([])?;
    let mut retyped = Vec::new();
    let mut seen = HashSet::new();

    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let live: bool = row.get(2)?;
        let stored = field_from_sql(column, old.column_type, row.get_ref(1)?)?;
        let canonical = stored.to_canonical();

        let converted = FieldValue::from_canonical(new.column_type, canonical.as_deref())
            .filter(|v| v.to_canonical() == canonical)
            .ok_or_else(|| {
                StoreError::invalid_value(
                    column,
                    format!(
                        "entity {id} holds '{}' which is not a {} value",
                        stored, new.column_type
                    ),
                )
            })?;

        if live {
            coerce_value(new, &converted)
                .map_err(|e| StoreError::invalid_value(column, format!("entity {id}: {e}")))?;
            if new.unique {
                if let Some(canonical) = &canonical {
                    if !seen.insert(canonical.clone()) {
                        return Err(StoreError::invalid_value(
                            column,
                            format!("value '{canonical}' is not unique among live entities"),
                        ));
                    }
                }
            }
        }
        if !converted.is_null() {
            retyped.push((id, converted));
        }
    }
    Ok(retyped)
}

/// Applies a type change of `column` to the physical table.
fn retype_column(
    conn: &Connection,
    prefix: &str,
    projected: &HashMap<String, ProjectedColumn>,
    column: &str,
    from: ColumnType,
    to: ColumnType,
    values: &[(i64, FieldValue)],
) -> Result<()> {
    if from == to {
        return Ok(());
    }
    if affinity(from) != affinity(to) {
        let mut layout = Vec::new();
        for name in physical_columns(conn, prefix)? {
            let column_type = if name == column {
                to
            } else {
                projected
                    .get(&name)
                    .map(|p| p.definition.column_type)
                    .ok_or_else(|| {
                        StoreError::StorageCorrupt(format!("physical column '{name}' has no schema entry"))
                    })?
            };
            layout.push((name, column_type));
        }
        conn.execute_batch(&rebuild_inventory_sql(prefix, &layout))?;
    }

    let mut update = conn.prepare(&format!(
        "UPDATE {prefix}inventory SET {} = ?1 WHERE id = ?2",
        quote_ident(column)
    ))?;
    for (id, value) in values {
        update.execute(params![field_to_sql(value), id])?;
    }
    Ok(())
}

/// Read and write access to the inventory schema.
pub struct SchemaRegistry<'a> {
    scope: Scope<'a>,
}

impl<'a> SchemaRegistry<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Applies one schema change.
    ///
    /// Requires `inventory.schema.w`. The physical table, the schema log,
    /// the projection and a lifecycle event are written in one transaction.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidDefinition`] if the definition is rejected
    /// - [`StoreError::DuplicateColumn`] on ADD of a live column
    /// - [`StoreError::UnknownColumn`] on EDIT or REMOVE of a column that
    ///   is not live
    /// - [`StoreError::InvalidValue`] if retained values do not fit the new
    ///   definition, or a required column is added while live entities exist
    pub fn apply_schema_change(&self, principal: &Principal, change: SchemaChange) -> Result<SchemaVersion> {
        let prefix = self.scope.prefix;
        let version = self.scope.write(|tx| {
            require(tx, prefix, principal, SCHEMA_WRITE)?;
            if let SchemaChange::Add(def) | SchemaChange::Edit(def) = &change {
                let errors = validate_definition(def);
                if !errors.is_empty() {
                    let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
                    return Err(StoreError::InvalidDefinition(reasons.join("; ")));
                }
            }

            let projected = projection(tx, prefix)?;
            let column = change.column();
            let existing = projected.get(column);
            let live = existing.filter(|p| p.active);

            let (from_val, to_val) = match &change {
                SchemaChange::Add(def) => {
                    if live.is_some() {
                        return Err(StoreError::DuplicateColumn(column.to_string()));
                    }
                    match existing {
                        Some(removed) => {
                            let values = check_retained(tx, prefix, &removed.definition, def)?;
                            retype_column(
                                tx,
                                prefix,
                                &projected,
                                column,
                                removed.definition.column_type,
                                def.column_type,
                                &values,
                            )?;
                        }
                        None => {
                            if physical_columns(tx, prefix)?.iter().any(|c| c == column) {
                                return Err(StoreError::StorageCorrupt(format!(
                                    "physical column '{column}' has no schema entry"
                                )));
                            }
                            if !def.nullable && count_live_entities(tx, prefix)? > 0 {
                                return Err(StoreError::invalid_value(
                                    column,
                                    "a required column cannot be added while live entities exist",
                                ));
                            }
                            tx.execute(&add_column_sql(prefix, column, def.column_type), [])?;
                        }
                    }
                    (None, Some(def))
                }
                SchemaChange::Edit(def) => {
                    let current = live.ok_or_else(|| StoreError::UnknownColumn(column.to_string()))?;
                    let values = check_retained(tx, prefix, &current.definition, def)?;
                    retype_column(
                        tx,
                        prefix,
                        &projected,
                        column,
                        current.definition.column_type,
                        def.column_type,
                        &values,
                    )?;
                    (Some(&current.definition), Some(def))
                }
                SchemaChange::Remove(_) => {
                    let current = live.ok_or_else(|| StoreError::UnknownColumn(column.to_string()))?;
                    (Some(&current.definition), None)
                }
            };

            let action = change.action();
            let seq = next_seq(tx, prefix, column)?;
            tx.execute(
                &format!(
                    "INSERT INTO {prefix}schema_transactions
                     (dispatcher, column_name, action_no, seq, from_val, to_val, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    principal.user_id,
                    column,
                    action.code(),
                    seq,
                    from_val.map(encode_definition).transpose()?,
                    to_val.map(encode_definition).transpose()?,
                    now(),
                ],
            )?;
            let id = tx.last_insert_rowid();

            match &change {
                SchemaChange::Add(def) => {
                    tx.execute(
                        &format!(
                            "INSERT INTO {prefix}inventory_columns (name, definition, position, active, schema_id)
                             VALUES (?1, ?2, ?3, 1, ?3)
                             ON CONFLICT(name) DO UPDATE SET definition = excluded.definition,
                                 position = excluded.position, active = 1, schema_id = excluded.schema_id"
                        ),
                        params![column, encode_definition(def)?, id],
                    )?;
                }
                SchemaChange::Edit(def) => {
                    tx.execute(
                        &format!(
                            "UPDATE {prefix}inventory_columns SET definition = ?1, schema_id = ?2 WHERE name = ?3"
                        ),
                        params![encode_definition(def)?, id, column],
                    )?;
                }
                SchemaChange::Remove(_) => {
                    tx.execute(
                        &format!("UPDATE {prefix}inventory_columns SET active = 0, schema_id = ?1 WHERE name = ?2"),
                        params![id, column],
                    )?;
                }
            }

            events::append(
                tx,
                prefix,
                EventAction::from(action),
                Some(principal.user_id),
                Some(id),
                Some(column),
            )?;

            Ok(SchemaVersion {
                id,
                column: column.to_string(),
                action,
                seq,
            })
        })?;

        debug!(
            user_id = principal.user_id,
            column = %version.column,
            action = ?version.action,
            seq = version.seq,
            "schema change applied"
        );
        Ok(version)
    }

    /// Returns the live column definitions in position order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageCorrupt`] if the projection disagrees
    /// with the log entry it cites or a physical column is missing.
    pub fn current_schema(&self) -> Result<Vec<ColumnDefinition>> {
        Ok(live_columns(self.scope.conn, self.scope.prefix)?
            .into_iter()
            .map(|c| c.definition)
            .collect())
    }

    /// Lists schema transactions in id order, for one column or all.
    pub fn schema_history(&self, column: Option<&str>) -> Result<Paged<'a, SchemaTransaction>> {
        let prefix = self.scope.prefix;
        let (sql, params) = match column {
            Some(column) => (
                format!(
                    "SELECT {SCHEMA_TX_COLUMNS} FROM {prefix}schema_transactions
                     WHERE column_name = ?1 AND id > ?2 ORDER BY id LIMIT ?3"
                ),
                vec![Value::Text(column.to_string())],
            ),
            None => (
                format!(
                    "SELECT {SCHEMA_TX_COLUMNS} FROM {prefix}schema_transactions
                     WHERE id > ?1 ORDER BY id LIMIT ?2"
                ),
                Vec::new(),
            ),
        };
        Ok(Paged::new(
            self.scope.conn,
            sql,
            params,
            self.scope.page_size,
            None,
            schema_tx_from_row,
        ))
    }
}
