//! Keyset-paged lazy iteration over append-only tables.
//!
//! Listings never load a whole table: a [`Paged`] iterator fetches one page
//! of rows at a time, resuming after the last id it yielded. Each page is a
//! separate read, so rows committed between pages with higher ids are
//! picked up and nothing is ever yielded twice.

use std::collections::VecDeque;

use invman_core::{Entity, Event, InventoryTransaction, SchemaTransaction};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};

use crate::error::Result;

/// Row types that are ordered by an integer key.
pub trait Keyed {
    fn key(&self) -> i64;
}

impl Keyed for SchemaTransaction {
    fn key(&self) -> i64 {
        self.id
    }
}

impl Keyed for InventoryTransaction {
    fn key(&self) -> i64 {
        self.id
    }
}

impl Keyed for Event {
    fn key(&self) -> i64 {
        self.id
    }
}

impl Keyed for Entity {
    fn key(&self) -> i64 {
        self.id
    }
}

type RowMapper<'c, T> = Box<dyn Fn(&Row<'_>) -> Result<T> + 'c>;

/// Lazy iterator over the rows of a keyset-paged query.
///
/// The query must bind the resume key and the page limit as its last two
/// parameters (`id > ?{n+1} ... ORDER BY id LIMIT ?{n+2}` for `n` leading
/// parameters). Iteration stops at the first error, which is yielded.
pub struct Paged<'c, T> {
    conn: &'c Connection,
    sql: String,
    params: Vec<Value>,
    mapper: RowMapper<'c, T>,
    after: i64,
    remaining: Option<u64>,
    page_size: u32,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<'c, T: Keyed> Paged<'c, T> {
    pub(crate) fn new(
        conn: &'c Connection,
        sql: String,
        params: Vec<Value>,
        page_size: u32,
        limit: Option<u64>,
        mapper: impl Fn(&Row<'_>) -> Result<T> + 'c,
    ) -> Self {
        Self {
            conn,
            sql,
            params,
            mapper: Box::new(mapper),
            after: 0,
            remaining: limit,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            exhausted: limit == Some(0),
        }
    }

    fn fetch_page(&mut self) -> Result<()> {
        let limit = match self.remaining {
            Some(remaining) => remaining.min(u64::from(self.page_size)),
            None => u64::from(self.page_size),
        };
        let mut bound = self.params.clone();
        bound.push(Value::Integer(self.after));
        bound.push(Value::Integer(limit as i64));

        let conn = self.conn;
        let mut stmt = conn.prepare_cached(&self.sql)?;
        let mut rows = stmt.query(params_from_iter(bound))?;
        let mut fetched = 0u64;
        while let Some(row) = rows.next()? {
            let item = (self.mapper)(row)?;
            self.after = item.key();
            self.buffer.push_back(item);
            fetched += 1;
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= fetched;
            if *remaining == 0 {
                self.exhausted = true;
            }
        }
        if fetched < limit {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl<T: Keyed> Iterator for Paged<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                self.buffer.clear();
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
