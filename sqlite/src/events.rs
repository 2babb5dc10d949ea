//! Append-only log of lifecycle actions.

use invman_core::{EVENTS_READ, Event, EventAction, Principal, UserId};
use rusqlite::types::Value;
use rusqlite::{Connection, params};

use crate::convert::{EVENT_COLUMNS, event_from_row, now};
use crate::cursor::Paged;
use crate::error::Result;
use crate::identity::require;
use crate::store::Scope;

/// Appends one event. Always called inside the caller's transaction.
pub(crate) fn append(
    conn: &Connection,
    prefix: &str,
    action: EventAction,
    dispatcher: Option<UserId>,
    target: Option<i64>,
    reason: Option<&str>,
) -> Result<i64> {
    conn.execute(
        &format!(
            "INSERT INTO {prefix}events (action_no, dispatcher, target, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)"
        ),
        params![action.code(), dispatcher, target, reason, now()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Read access to the event log.
pub struct EventLog<'a> {
    scope: Scope<'a>,
}

impl<'a> EventLog<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Lists events in id order, optionally restricted to one action.
    ///
    /// Requires `events.r`.
    pub fn list_events(&self, principal: &Principal, action: Option<EventAction>) -> Result<Paged<'a, Event>> {
        let prefix = self.scope.prefix;
        require(self.scope.conn, prefix, principal, EVENTS_READ)?;
        let (sql, params) = match action {
            Some(action) => (
                format!(
                    "SELECT {EVENT_COLUMNS} FROM {prefix}events
                     WHERE action_no = ?1 AND id > ?2 ORDER BY id LIMIT ?3"
                ),
                vec![Value::Integer(i64::from(action.code()))],
            ),
            None => (
                format!("SELECT {EVENT_COLUMNS} FROM {prefix}events WHERE id > ?1 ORDER BY id LIMIT ?2"),
                Vec::new(),
            ),
        };
        Ok(Paged::new(
            self.scope.conn,
            sql,
            params,
            self.scope.page_size,
            None,
            event_from_row,
        ))
    }
}
