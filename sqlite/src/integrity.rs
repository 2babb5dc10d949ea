//! Log replay checks.
//!
//! The column projection and the inventory table are both derived state:
//! replaying `schema_transactions` must yield exactly the live columns, and
//! replaying each entity's `inventory_transactions` must yield exactly its
//! stored field values and deletion state.

use std::collections::HashSet;

use invman_core::{ColumnDefinition, SchemaTransaction, replay_entity, replay_schema};
use serde::Serialize;
use tracing::{debug, warn};

use crate::convert::{INVENTORY_TX_COLUMNS, SCHEMA_TX_COLUMNS, field_from_sql, inventory_tx_from_row, schema_tx_from_row};
use crate::error::{Result, StoreError};
use crate::registry::{live_columns, physical_columns, projection};
use crate::schema::quote_ident;
use crate::store::Scope;

/// Counts of what a successful verification looked at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub columns_checked: usize,
    pub entities_checked: usize,
    pub transactions_checked: usize,
}

fn corrupt(message: String) -> StoreError {
    warn!(%message, "integrity check failed");
    StoreError::StorageCorrupt(message)
}

pub(crate) fn verify(scope: Scope<'_>) -> Result<IntegrityReport> {
    let conn = scope.conn;
    let prefix = scope.prefix;
    let mut report = IntegrityReport::default();

    let mut stmt = conn.prepare(&format!(
        "SELECT {SCHEMA_TX_COLUMNS} FROM {prefix}schema_transactions ORDER BY id"
    ))?;
    let mut rows = stmt.query([])?;
    let mut schema_log: Vec<SchemaTransaction> = Vec::new();
    while let Some(row) = rows.next()? {
        schema_log.push(schema_tx_from_row(row)?);
    }
    drop(rows);
    drop(stmt);
    report.transactions_checked += schema_log.len();

    let replayed = replay_schema(&schema_log).map_err(|e| corrupt(format!("schema log: {e}")))?;
    let projected = projection(conn, prefix)?;

    for column in &replayed {
        let name = &column.definition.name;
        let Some(stored) = projected.get(name) else {
            return Err(corrupt(format!("column '{name}' is live in the log but not projected")));
        };
        if !stored.active {
            return Err(corrupt(format!("column '{name}' is live in the log but projected inactive")));
        }
        if stored.definition != column.definition {
            return Err(corrupt(format!("column '{name}' definition differs from the log")));
        }
        if stored.position != column.position || stored.schema_id != column.schema_id {
            return Err(corrupt(format!(
                "column '{name}' projected at position {} from transaction {}, log says {} from {}",
                stored.position, stored.schema_id, column.position, column.schema_id
            )));
        }
    }
    let live: HashSet<&str> = replayed.iter().map(|c| c.definition.name.as_str()).collect();
    if let Some(extra) = projected.iter().find(|(name, c)| c.active && !live.contains(name.as_str())) {
        return Err(corrupt(format!("column '{}' is projected live but removed in the log", extra.0)));
    }
    report.columns_checked = projected.len();

    // Citations and physical presence of live columns.
    live_columns(conn, prefix)?;

    let physical = physical_columns(conn, prefix)?;
    if let Some(stray) = physical.iter().find(|name| !projected.contains_key(name.as_str())) {
        return Err(corrupt(format!("inventory table has unregistered column '{stray}'")));
    }
    if let Some(missing) = projected.keys().find(|name| !physical.contains(name)) {
        return Err(corrupt(format!("column '{missing}' is missing from the inventory table")));
    }

    // Every physical column, live or removed, must agree with the log.
    let columns: Vec<&ColumnDefinition> = physical
        .iter()
        .filter_map(|name| projected.get(name).map(|c| &c.definition))
        .collect();
    let selected: String = columns
        .iter()
        .map(|c| format!(", {}", quote_ident(&c.name)))
        .collect();
    let mut entities = conn.prepare(&format!(
        "SELECT id, deleted_at{selected} FROM {prefix}inventory ORDER BY id"
    ))?;
    let mut history = conn.prepare(&format!(
        "SELECT {INVENTORY_TX_COLUMNS} FROM {prefix}inventory_transactions WHERE inventory_id = ?1 ORDER BY id"
    ))?;

    let mut rows = entities.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let deleted_at: Option<String> = row.get(1)?;

        let mut log = Vec::new();
        let mut tx_rows = history.query([id])?;
        while let Some(tx_row) = tx_rows.next()? {
            log.push(inventory_tx_from_row(tx_row)?);
        }
        report.transactions_checked += log.len();

        let snapshot = replay_entity(&log);
        if !snapshot.created {
            return Err(corrupt(format!("entity {id} has no CREATE transaction")));
        }
        if snapshot.deleted != deleted_at.is_some() {
            return Err(corrupt(format!("entity {id} deletion state differs from its log")));
        }
        for (i, column) in columns.iter().enumerate() {
            let stored = field_from_sql(&column.name, column.column_type, row.get_ref(2 + i)?)?;
            if stored.to_canonical().as_deref() != snapshot.value(&column.name) {
                return Err(corrupt(format!(
                    "entity {id} field '{}' is '{stored}' but its log says {:?}",
                    column.name,
                    snapshot.value(&column.name)
                )));
            }
        }
        report.entities_checked += 1;
    }

    debug!(
        columns = report.columns_checked,
        entities = report.entities_checked,
        transactions = report.transactions_checked,
        "integrity verified"
    );
    Ok(report)
}
