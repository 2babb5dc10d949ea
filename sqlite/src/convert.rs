//! Conversion between core types and SQLite rows.
//!
//! Field values map onto the storage affinity of their column (booleans are
//! stored as 0/1 integers); column definitions are stored as JSON. Reading
//! a value that does not fit its column type means the live table no longer
//! matches the schema and is reported as [`StoreError::StorageCorrupt`].

use chrono::{DateTime, Utc};
use invman_core::{
    ColumnDefinition, ColumnType, EntityAction, Event, FieldValue, InventoryTransaction,
    SchemaAction, SchemaTransaction,
};
use rusqlite::Row;
use rusqlite::types::{Value, ValueRef};

use crate::error::{Result, StoreError};

/// Timestamp layout shared by every table; sorts lexicographically.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub(crate) const SCHEMA_TX_COLUMNS: &str =
    "id, dispatcher, column_name, action_no, seq, from_val, to_val, created_at";

pub(crate) const INVENTORY_TX_COLUMNS: &str =
    "id, dispatcher, schema_id, inventory_id, field, action_no, seq, from_val, to_val, created_at";

pub(crate) const EVENT_COLUMNS: &str = "id, action_no, dispatcher, target, reason, created_at";

/// Formats a UTC instant in the stored timestamp layout.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Current time in the stored timestamp layout.
pub(crate) fn now() -> String {
    timestamp(Utc::now())
}

/// Converts a field value to the SQL value bound for its column.
pub(crate) fn field_to_sql(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(b) => Value::Integer(i64::from(*b)),
        FieldValue::Integer(i) => Value::Integer(*i),
        FieldValue::Real(r) => Value::Real(*r),
        FieldValue::Text(s) => Value::Text(s.clone()),
    }
}

/// Reads a stored value back as a field value of `column_type`.
pub(crate) fn field_from_sql(column: &str, column_type: ColumnType, raw: ValueRef<'_>) -> Result<FieldValue> {
    let value = match (column_type, raw) {
        (_, ValueRef::Null) => Some(FieldValue::Null),
        (ColumnType::Text | ColumnType::Varchar, ValueRef::Text(bytes)) => std::str::from_utf8(bytes)
            .ok()
            .map(|s| FieldValue::Text(s.to_string())),
        (ColumnType::Int, ValueRef::Integer(i)) => Some(FieldValue::Integer(i)),
        (ColumnType::Real, ValueRef::Real(r)) => Some(FieldValue::Real(r)),
        (ColumnType::Real, ValueRef::Integer(i)) => Some(FieldValue::Real(i as f64)),
        (ColumnType::Bool, ValueRef::Integer(0)) => Some(FieldValue::Bool(false)),
        (ColumnType::Bool, ValueRef::Integer(1)) => Some(FieldValue::Bool(true)),
        _ => None,
    };
    value.ok_or_else(|| {
        StoreError::StorageCorrupt(format!(
            "column '{column}' holds a {:?} value that is not a valid {column_type}",
            raw.data_type()
        ))
    })
}

/// Serializes a column definition for the log and the projection.
pub(crate) fn encode_definition(def: &ColumnDefinition) -> Result<String> {
    Ok(serde_json::to_string(def)?)
}

/// Parses a stored column definition.
pub(crate) fn decode_definition(json: &str) -> Result<ColumnDefinition> {
    serde_json::from_str(json)
        .map_err(|e| StoreError::StorageCorrupt(format!("unreadable column definition: {e}")))
}

fn decode_optional_definition(json: Option<String>) -> Result<Option<ColumnDefinition>> {
    json.as_deref().map(decode_definition).transpose()
}

fn action_code(row: &Row<'_>, idx: usize) -> Result<u32> {
    let code: i64 = row.get(idx)?;
    u32::try_from(code).map_err(|_| StoreError::StorageCorrupt(format!("invalid action code {code}")))
}

/// Maps a row selected with [`SCHEMA_TX_COLUMNS`].
pub(crate) fn schema_tx_from_row(row: &Row<'_>) -> Result<SchemaTransaction> {
    let code = action_code(row, 3)?;
    let action = SchemaAction::from_code(code)
        .ok_or_else(|| StoreError::StorageCorrupt(format!("unknown schema action {code}")))?;
    Ok(SchemaTransaction {
        id: row.get(0)?,
        dispatcher: row.get(1)?,
        column: row.get(2)?,
        action,
        seq: row.get(4)?,
        from_val: decode_optional_definition(row.get(5)?)?,
        to_val: decode_optional_definition(row.get(6)?)?,
        created_at: row.get(7)?,
    })
}

/// Maps a row selected with [`INVENTORY_TX_COLUMNS`].
pub(crate) fn inventory_tx_from_row(row: &Row<'_>) -> Result<InventoryTransaction> {
    let code = action_code(row, 5)?;
    let action = EntityAction::from_code(code)
        .ok_or_else(|| StoreError::StorageCorrupt(format!("unknown inventory action {code}")))?;
    Ok(InventoryTransaction {
        id: row.get(0)?,
        dispatcher: row.get(1)?,
        schema_id: row.get(2)?,
        inventory_id: row.get(3)?,
        field: row.get(4)?,
        action,
        seq: row.get(6)?,
        from_val: row.get(7)?,
        to_val: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Maps a row selected with [`EVENT_COLUMNS`].
pub(crate) fn event_from_row(row: &Row<'_>) -> Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        action_no: action_code(row, 1)?,
        dispatcher: row.get(2)?,
        target: row.get(3)?,
        reason: row.get(4)?,
        created_at: row.get(5)?,
    })
}
