//! Inventory entities and their field-level history.
//!
//! Each mutation updates the live row and appends to
//! `inventory_transactions` in the same transaction. Every row written by
//! one operation shares a per-entity `seq`; field rows carry the canonical
//! old and new value so replaying them in id order rebuilds the live row.

use std::collections::HashMap;

use invman_core::{
    ColumnDefinition, Entity, EntityAction, EntityId, EventAction, FieldValue, INVENTORY_DELETE,
    INVENTORY_READ, INVENTORY_WRITE, InventoryTransaction, Principal, UserId, coerce_value,
    resolve_default,
};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::debug;

use crate::convert::{INVENTORY_TX_COLUMNS, field_from_sql, field_to_sql, inventory_tx_from_row, now};
use crate::cursor::Paged;
use crate::error::{Result, StoreError};
use crate::events;
use crate::identity::require;
use crate::registry::{LiveColumn, live_columns};
use crate::schema::quote_ident;
use crate::store::Scope;

/// A caller-supplied SQL condition for [`EntityStore::list_entities`].
///
/// The condition is placed verbatim inside `WHERE (...)` and may reference
/// any column of the inventory table. Parameters are bound positionally
/// (`?` or `?1..?n`), never interpolated. The condition itself is trusted:
/// only pass SQL written by the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFilter {
    pub sql: String,
    pub params: Vec<FieldValue>,
}

impl RawFilter {
    pub fn new(sql: impl Into<String>, params: Vec<FieldValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Selection for [`EntityStore::list_entities`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityQuery {
    pub filter: Option<RawFilter>,
    /// Maximum number of entities to yield.
    pub limit: Option<u64>,
    /// Include soft-deleted entities.
    pub include_deleted: bool,
}

/// One row to append to the inventory log.
struct LogEntry<'e> {
    schema_id: Option<i64>,
    field: Option<&'e str>,
    action: EntityAction,
    from_val: Option<String>,
    to_val: Option<String>,
}

struct Mutation<'m> {
    prefix: &'m str,
    dispatcher: UserId,
    entity: EntityId,
    seq: i64,
    at: &'m str,
}

impl Mutation<'_> {
    fn append(&self, conn: &Connection, entry: LogEntry<'_>) -> Result<()> {
        let prefix = self.prefix;
        conn.prepare_cached(&format!(
            "INSERT INTO {prefix}inventory_transactions
             (dispatcher, schema_id, inventory_id, field, action_no, seq, from_val, to_val, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ))?
        .execute(params![
            self.dispatcher,
            entry.schema_id,
            self.entity,
            entry.field,
            entry.action.code(),
            self.seq,
            entry.from_val,
            entry.to_val,
            self.at,
        ])?;
        Ok(())
    }
}

fn next_seq(conn: &Connection, prefix: &str, entity: EntityId) -> Result<i64> {
    Ok(conn.query_row(
        &format!("SELECT COALESCE(MAX(seq), 0) + 1 FROM {prefix}inventory_transactions WHERE inventory_id = ?1"),
        [entity],
        |row| row.get(0),
    )?)
}

fn select_sql(prefix: &str, columns: &[ColumnDefinition]) -> String {
    let fields: String = columns
        .iter()
        .map(|c| format!(", {}", quote_ident(&c.name)))
        .collect();
    format!("SELECT id, created_at, updated_at, deleted_at{fields} FROM {prefix}inventory")
}

fn entity_from_row(row: &Row<'_>, columns: &[ColumnDefinition]) -> Result<Entity> {
    let mut fields = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let value = field_from_sql(&column.name, column.column_type, row.get_ref(4 + i)?)?;
        fields.push((column.name.clone(), value));
    }
    Ok(Entity {
        id: row.get(0)?,
        created_at: row.get(1)?,
        updated_at: row.get(2)?,
        deleted_at: row.get(3)?,
        fields,
    })
}

fn load_entity(
    conn: &Connection,
    prefix: &str,
    columns: &[ColumnDefinition],
    id: EntityId,
    live_only: bool,
) -> Result<Option<Entity>> {
    let condition = if live_only { " AND deleted_at IS NULL" } else { "" };
    let sql = format!("{} WHERE id = ?1{condition}", select_sql(prefix, columns));
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(entity_from_row(row, columns)?)),
        None => Ok(None),
    }
}

fn ensure_unique(
    conn: &Connection,
    prefix: &str,
    column: &str,
    value: &FieldValue,
    except: Option<EntityId>,
) -> Result<()> {
    let clash: Option<i64> = conn
        .query_row(
            &format!(
                "SELECT id FROM {prefix}inventory
                 WHERE {} = ?1 AND deleted_at IS NULL AND id <> ?2 LIMIT 1",
                quote_ident(column)
            ),
            params![field_to_sql(value), except.unwrap_or(0)],
            |row| row.get(0),
        )
        .optional()?;
    match clash {
        Some(other) => Err(StoreError::invalid_value(
            column,
            format!("value '{value}' is already used by entity {other}"),
        )),
        None => Ok(()),
    }
}

/// Indexes caller fields by name, rejecting unknown and repeated names.
fn index_fields<'f>(
    columns: &[LiveColumn],
    fields: &'f [(String, FieldValue)],
) -> Result<HashMap<&'f str, &'f FieldValue>> {
    let mut given = HashMap::with_capacity(fields.len());
    for (name, value) in fields {
        if !columns.iter().any(|c| c.definition.name == *name) {
            return Err(StoreError::UnknownColumn(name.clone()));
        }
        if given.insert(name.as_str(), value).is_some() {
            return Err(StoreError::invalid_value(name, "given more than once"));
        }
    }
    Ok(given)
}

/// Read and write access to inventory entities.
pub struct EntityStore<'a> {
    scope: Scope<'a>,
}

impl<'a> EntityStore<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Inserts an entity and returns its id.
    ///
    /// Requires `inventory.w`. Columns not given take their default (or
    /// NULL). One CREATE transaction is logged per non-NULL field, or a
    /// single row-level CREATE when every field is NULL.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownColumn`] for a field that is not a live column
    /// - [`StoreError::InvalidValue`] for a value that violates its column
    ///   definition, including uniqueness among live entities
    pub fn create_entity(&self, principal: &Principal, fields: Vec<(String, FieldValue)>) -> Result<EntityId> {
        let prefix = self.scope.prefix;

        let (id, logged) = self.scope.write(|tx| {
            require(tx, prefix, principal, INVENTORY_WRITE)?;
            let columns = live_columns(tx, prefix)?;
            let given = index_fields(&columns, &fields)?;
            let at = now();

            let mut values = Vec::with_capacity(columns.len());
            for column in &columns {
                let def = &column.definition;
                let invalid = |e: invman_core::ValidationError| StoreError::invalid_value(&def.name, e);
                let value = match given.get(def.name.as_str()) {
                    Some(value) => coerce_value(def, value).map_err(invalid)?,
                    None => match resolve_default(def, &at).map_err(invalid)? {
                        Some(value) => value,
                        None => coerce_value(def, &FieldValue::Null).map_err(invalid)?,
                    },
                };
                if def.unique && !value.is_null() {
                    ensure_unique(tx, prefix, &def.name, &value, None)?;
                }
                values.push((column, value));
            }

            let names: String = values
                .iter()
                .map(|(c, _)| format!(", {}", quote_ident(&c.definition.name)))
                .collect();
            let placeholders: String = (0..values.len()).map(|i| format!(", ?{}", i + 2)).collect();
            let mut bound = vec![Value::Text(at.clone())];
            bound.extend(values.iter().map(|(_, v)| field_to_sql(v)));
            tx.execute(
                &format!(
                    "INSERT INTO {prefix}inventory (created_at, updated_at{names}) VALUES (?1, ?1{placeholders})"
                ),
                params_from_iter(bound),
            )?;
            let id = tx.last_insert_rowid();

            let mutation = Mutation {
                prefix,
                dispatcher: principal.user_id,
                entity: id,
                seq: 1,
                at: &at,
            };
            let mut logged = 0;
            for (column, value) in &values {
                if let Some(canonical) = value.to_canonical() {
                    mutation.append(
                        tx,
                        LogEntry {
                            schema_id: Some(column.schema_id),
                            field: Some(&column.definition.name),
                            action: EntityAction::Create,
                            from_val: None,
                            to_val: Some(canonical),
                        },
                    )?;
                    logged += 1;
                }
            }
            if logged == 0 {
                mutation.append(
                    tx,
                    LogEntry {
                        schema_id: None,
                        field: None,
                        action: EntityAction::Create,
                        from_val: None,
                        to_val: None,
                    },
                )?;
            }

            events::append(tx, prefix, EventAction::InventoryCreate, Some(principal.user_id), Some(id), None)?;
            Ok((id, logged))
        })?;

        debug!(user_id = principal.user_id, entity_id = id, fields = logged, seq = 1, "entity created");
        Ok(id)
    }

    /// Changes fields of a live entity and returns how many actually changed.
    ///
    /// Requires `inventory.w`. Fields whose value is unchanged are skipped;
    /// a call that changes nothing writes nothing.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if there is no live entity with this id
    /// - [`StoreError::UnknownColumn`] for a field that is not a live column
    /// - [`StoreError::InvalidValue`] for a value that violates its column
    ///   definition
    pub fn edit_entity(&self, principal: &Principal, id: EntityId, fields: Vec<(String, FieldValue)>) -> Result<usize> {
        let prefix = self.scope.prefix;

        let (changed, seq) = self.scope.write(|tx| {
            require(tx, prefix, principal, INVENTORY_WRITE)?;
            let columns = live_columns(tx, prefix)?;
            let definitions: Vec<ColumnDefinition> = columns.iter().map(|c| c.definition.clone()).collect();
            let current = load_entity(tx, prefix, &definitions, id, true)?.ok_or(StoreError::NotFound(id))?;
            let given = index_fields(&columns, &fields)?;

            let mut changes = Vec::new();
            for column in &columns {
                let def = &column.definition;
                let Some(requested) = given.get(def.name.as_str()) else {
                    continue;
                };
                let value = coerce_value(def, requested).map_err(|e| StoreError::invalid_value(&def.name, e))?;
                let old = current.get(&def.name).cloned().unwrap_or_default();
                if old.to_canonical() == value.to_canonical() {
                    continue;
                }
                if def.unique && !value.is_null() {
                    ensure_unique(tx, prefix, &def.name, &value, Some(id))?;
                }
                changes.push((column, old, value));
            }
            if changes.is_empty() {
                return Ok((0, None));
            }

            let at = now();
            let assignments: String = changes
                .iter()
                .enumerate()
                .map(|(i, (c, _, _))| format!("{} = ?{}, ", quote_ident(&c.definition.name), i + 3))
                .collect();
            let mut bound = vec![Value::Integer(id), Value::Text(at.clone())];
            bound.extend(changes.iter().map(|(_, _, v)| field_to_sql(v)));
            tx.execute(
                &format!("UPDATE {prefix}inventory SET {assignments}updated_at = ?2 WHERE id = ?1"),
                params_from_iter(bound),
            )?;

            let mutation = Mutation {
                prefix,
                dispatcher: principal.user_id,
                entity: id,
                seq: next_seq(tx, prefix, id)?,
                at: &at,
            };
            for (column, old, new) in &changes {
                mutation.append(
                    tx,
                    LogEntry {
                        schema_id: Some(column.schema_id),
                        field: Some(&column.definition.name),
                        action: EntityAction::Update,
                        from_val: old.to_canonical(),
                        to_val: new.to_canonical(),
                    },
                )?;
            }

            let touched: Vec<&str> = changes.iter().map(|(c, _, _)| c.definition.name.as_str()).collect();
            events::append(
                tx,
                prefix,
                EventAction::InventoryUpdate,
                Some(principal.user_id),
                Some(id),
                Some(&touched.join(",")),
            )?;
            Ok((changes.len(), Some(mutation.seq)))
        })?;

        debug!(user_id = principal.user_id, entity_id = id, changed, seq = ?seq, "entity edited");
        Ok(changed)
    }

    /// Soft-deletes a live entity.
    ///
    /// Requires `inventory.deleted_at.w`. Logs one row-level DELETE whose
    /// `to_val` is the deletion timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the entity does not exist or is
    /// already deleted.
    pub fn soft_delete_entity(&self, principal: &Principal, id: EntityId) -> Result<()> {
        let prefix = self.scope.prefix;

        let seq = self.scope.write(|tx| {
            require(tx, prefix, principal, INVENTORY_DELETE)?;
            let at = now();
            let updated = tx.execute(
                &format!(
                    "UPDATE {prefix}inventory SET deleted_at = ?1, updated_at = ?1
                     WHERE id = ?2 AND deleted_at IS NULL"
                ),
                params![at, id],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(id));
            }

            let mutation = Mutation {
                prefix,
                dispatcher: principal.user_id,
                entity: id,
                seq: next_seq(tx, prefix, id)?,
                at: &at,
            };
            mutation.append(
                tx,
                LogEntry {
                    schema_id: None,
                    field: None,
                    action: EntityAction::Delete,
                    from_val: None,
                    to_val: Some(at.clone()),
                },
            )?;
            events::append(tx, prefix, EventAction::InventoryDelete, Some(principal.user_id), Some(id), None)?;
            Ok(mutation.seq)
        })?;

        debug!(user_id = principal.user_id, entity_id = id, seq, "entity soft-deleted");
        Ok(())
    }

    /// Reads one entity, soft-deleted or not.
    ///
    /// Requires `inventory.r`.
    pub fn get_entity(&self, principal: &Principal, id: EntityId) -> Result<Entity> {
        let prefix = self.scope.prefix;
        require(self.scope.conn, prefix, principal, INVENTORY_READ)?;
        let columns: Vec<ColumnDefinition> = live_columns(self.scope.conn, prefix)?
            .into_iter()
            .map(|c| c.definition)
            .collect();
        load_entity(self.scope.conn, prefix, &columns, id, false)?.ok_or(StoreError::NotFound(id))
    }

    /// Lists entities in id order, lazily, keyed by the current schema.
    ///
    /// Requires `inventory.r`. Soft-deleted entities are skipped unless
    /// `include_deleted` is set.
    ///
    /// # Examples
    ///
    /// ```
    /// # use invman_core::*;
    /// # use invman_sqlite::*;
    /// # let inv = Inventory::open_in_memory(StoreOptions::default()).unwrap();
    /// # inv.identity().register("admin", "pw").unwrap();
    /// # let token = inv.identity().authenticate("admin", "pw").unwrap().token;
    /// # let admin = inv.sessions().validate_session(&token).unwrap();
    /// # inv.registry().apply_schema_change(&admin, SchemaChange::Add(ColumnDefinition::new("qty", ColumnType::Int))).unwrap();
    /// # for qty in [1_i64, 5, 9] {
    /// #     inv.entities().create_entity(&admin, vec![("qty".into(), qty.into())]).unwrap();
    /// # }
    /// let query = EntityQuery {
    ///     filter: Some(RawFilter::new("qty >= ?", vec![FieldValue::Integer(5)])),
    ///     ..EntityQuery::default()
    /// };
    /// let found: Vec<Entity> = inv
    ///     .entities()
    ///     .list_entities(&admin, query)
    ///     .unwrap()
    ///     .collect::<Result<_>>()
    ///     .unwrap();
    /// assert_eq!(found.len(), 2);
    /// ```
    pub fn list_entities(&self, principal: &Principal, query: EntityQuery) -> Result<Paged<'a, Entity>> {
        let prefix = self.scope.prefix;
        require(self.scope.conn, prefix, principal, INVENTORY_READ)?;
        let columns: Vec<ColumnDefinition> = live_columns(self.scope.conn, prefix)?
            .into_iter()
            .map(|c| c.definition)
            .collect();

        let (condition, params) = match query.filter {
            Some(filter) => {
                let probe = self
                    .scope
                    .conn
                    .prepare(&format!("SELECT 1 FROM {prefix}inventory WHERE ({})", filter.sql))?;
                if probe.parameter_count() != filter.params.len() {
                    return Err(StoreError::InvalidInput(format!(
                        "filter expects {} parameters, {} given",
                        probe.parameter_count(),
                        filter.params.len()
                    )));
                }
                (
                    format!("({}) AND ", filter.sql),
                    filter.params.iter().map(field_to_sql).collect::<Vec<_>>(),
                )
            }
            None => (String::new(), Vec::new()),
        };
        let live = if query.include_deleted { "" } else { " AND deleted_at IS NULL" };
        let n = params.len();
        let sql = format!(
            "{} WHERE {condition}id > ?{}{live} ORDER BY id LIMIT ?{}",
            select_sql(prefix, &columns),
            n + 1,
            n + 2
        );

        Ok(Paged::new(
            self.scope.conn,
            sql,
            params,
            self.scope.page_size,
            query.limit,
            move |row| entity_from_row(row, &columns),
        ))
    }

    /// Lists the transactions of one entity in id order.
    ///
    /// Requires `inventory.r`. Soft-deleted entities keep their history.
    pub fn entity_history(&self, principal: &Principal, id: EntityId) -> Result<Paged<'a, InventoryTransaction>> {
        let prefix = self.scope.prefix;
        require(self.scope.conn, prefix, principal, INVENTORY_READ)?;
        let exists: Option<i64> = self
            .scope
            .conn
            .query_row(
                &format!("SELECT id FROM {prefix}inventory WHERE id = ?1"),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound(id));
        }

        Ok(Paged::new(
            self.scope.conn,
            format!(
                "SELECT {INVENTORY_TX_COLUMNS} FROM {prefix}inventory_transactions
                 WHERE inventory_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3"
            ),
            vec![Value::Integer(id)],
            self.scope.page_size,
            None,
            inventory_tx_from_row,
        ))
    }
}
