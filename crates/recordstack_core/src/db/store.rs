//! Persistent store handle and its read/write primitives.
//!
//! # Responsibility
//! - Page through stored rows of one record type in compiled filter/sort order.
//! - Count matching rows without decoding them.
//! - Apply a root session's change set in one transaction.
//!
//! # Invariants
//! - One connection per store, guarded by a mutex; a scan holds the lock for
//!   its whole duration so pages come from one consistent view.
//! - A failed `apply` rolls back completely.
//! - Rows of equal sort key come back in insertion (`seq`) order.

use super::open::destroy_store_files;
use super::{StoreError, StoreResult};
use crate::model::record::RecordId;
use crate::model::value::Value;
use crate::query::sql::SqlFragment;
use log::{error, info};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use uuid::Uuid;

/// One decoded row from the `records` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRow {
    pub record_id: RecordId,
    pub fields: BTreeMap<String, Value>,
}

/// One write produced by a root-session save.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordWrite {
    Insert {
        record_id: RecordId,
        record_type: String,
        fields: BTreeMap<String, Value>,
    },
    Update {
        record_id: RecordId,
        record_type: String,
        fields: BTreeMap<String, Value>,
    },
    Delete {
        record_id: RecordId,
    },
}

/// Ordered writes applied atomically by `PersistentStore::apply`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub writes: Vec<RecordWrite>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Read request over one record type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StoreQuery<'a> {
    pub record_type: &'a str,
    pub filter: Option<&'a SqlFragment>,
    pub order: Option<&'a SqlFragment>,
    /// Rows shadowed by pending session changes.
    pub excluded: &'a [RecordId],
}

/// Shared handle to the durable store of one stack.
#[derive(Debug)]
pub struct PersistentStore {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
    schema_name: String,
}

impl PersistentStore {
    pub(crate) fn new(conn: Connection, path: Option<PathBuf>, schema_name: &str) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            path,
            schema_name: schema_name.to_string(),
        }
    }

    /// Store file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Visits matching rows page by page until exhausted or `visit` breaks.
    ///
    /// `batch_size = None` reads everything in one page.
    pub(crate) fn scan<F>(
        &self,
        query: StoreQuery<'_>,
        batch_size: Option<usize>,
        mut visit: F,
    ) -> StoreResult<()>
    where
        F: FnMut(StoreRow) -> ControlFlow<()>,
    {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;

        let (mut sql, base_params) = select_clause("record_id, fields", &query)?;
        sql.push_str(" ORDER BY ");
        let mut order_params = Vec::new();
        if let Some(order) = query.order.filter(|order| !order.sql.is_empty()) {
            sql.push_str(&order.sql);
            sql.push_str(", ");
            order_params.extend(order.params.iter().cloned());
        }
        sql.push_str("seq ASC");
        if batch_size.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut offset = 0usize;
        loop {
            let mut bind = base_params.clone();
            bind.extend(order_params.iter().cloned());
            if let Some(size) = batch_size {
                bind.push(SqlValue::Integer(to_i64(size)));
                bind.push(SqlValue::Integer(to_i64(offset)));
            }

            let mut rows = stmt.query(params_from_iter(bind))?;
            let mut page = Vec::new();
            while let Some(row) = rows.next()? {
                let id_text: String = row.get(0)?;
                let fields_text: String = row.get(1)?;
                page.push(decode_row(&id_text, &fields_text)?);
            }
            drop(rows);

            let page_len = page.len();
            for row in page {
                if visit(row).is_break() {
                    return Ok(());
                }
            }

            match batch_size {
                Some(size) if page_len == size => offset += size,
                _ => return Ok(()),
            }
        }
    }

    /// Counts matching rows as a pure aggregate.
    pub(crate) fn count(&self, query: StoreQuery<'_>) -> StoreResult<usize> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;

        let (sql, bind) = select_clause("COUNT(*)", &query)?;
        let count: i64 = conn.query_row(&sql, params_from_iter(bind), |row| row.get(0))?;
        usize::try_from(count)
            .map_err(|_| StoreError::InvalidData(format!("negative row count {count}")))
    }

    /// Applies `changes` in order inside one transaction.
    ///
    /// # Side effects
    /// - Emits `store_apply` logging events with write count and duration.
    pub fn apply(&self, changes: &ChangeSet) -> StoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let started_at = Instant::now();
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let result = apply_in_transaction(conn, changes);
        match &result {
            Ok(()) => info!(
                "event=store_apply module=db status=ok schema={} writes={} duration_ms={}",
                self.schema_name,
                changes.writes.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=store_apply module=db status=error schema={} writes={} duration_ms={} error_code=store_apply_failed error={err}",
                self.schema_name,
                changes.writes.len(),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    /// Closes the connection; later calls fail with `StoreError::Closed`.
    pub fn close(&self) {
        if let Some(conn) = self.lock().take() {
            if let Err((_, err)) = conn.close() {
                error!(
                    "event=store_close module=db status=error schema={} error={err}",
                    self.schema_name
                );
            }
        }
    }

    /// Closes the store and deletes its files.
    pub fn destroy(&self) -> StoreResult<()> {
        self.close();
        if let Some(path) = &self.path {
            destroy_store_files(path)?;
        }
        info!(
            "event=store_destroy module=db status=ok schema={}",
            self.schema_name
        );
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // A panic mid-statement leaves no open transaction behind.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn select_clause(columns: &str, query: &StoreQuery<'_>) -> StoreResult<(String, Vec<SqlValue>)> {
    let mut sql = format!("SELECT {columns} FROM records WHERE record_type = ?");
    let mut bind = vec![SqlValue::Text(query.record_type.to_string())];

    if let Some(filter) = query.filter {
        sql.push_str(" AND ");
        sql.push_str(&filter.sql);
        bind.extend(filter.params.iter().cloned());
    }

    // One JSON array parameter keeps large pending sets under SQLite's
    // bound-variable cap.
    if !query.excluded.is_empty() {
        sql.push_str(" AND record_id NOT IN (SELECT value FROM json_each(?))");
        let ids = serde_json::to_string(query.excluded).map_err(|err| {
            StoreError::InvalidData(format!("failed to encode excluded ids: {err}"))
        })?;
        bind.push(SqlValue::Text(ids));
    }

    Ok((sql, bind))
}

fn apply_in_transaction(conn: &mut Connection, changes: &ChangeSet) -> StoreResult<()> {
    let tx = conn.transaction()?;
    for write in &changes.writes {
        match write {
            RecordWrite::Insert {
                record_id,
                record_type,
                fields,
            } => {
                tx.execute(
                    "INSERT INTO records (record_id, record_type, fields) VALUES (?1, ?2, ?3);",
                    params![record_id.to_string(), record_type, encode_fields(fields)?],
                )?;
            }
            RecordWrite::Update {
                record_id,
                record_type,
                fields,
            } => {
                tx.execute(
                    "INSERT INTO records (record_id, record_type, fields) VALUES (?1, ?2, ?3)
                     ON CONFLICT(record_id) DO UPDATE SET
                        fields = excluded.fields,
                        updated_at = (strftime('%s', 'now') * 1000);",
                    params![record_id.to_string(), record_type, encode_fields(fields)?],
                )?;
            }
            RecordWrite::Delete { record_id } => {
                tx.execute(
                    "DELETE FROM records WHERE record_id = ?1;",
                    [record_id.to_string()],
                )?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

fn encode_fields(fields: &BTreeMap<String, Value>) -> StoreResult<String> {
    let object: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    serde_json::to_string(&object)
        .map_err(|err| StoreError::InvalidData(format!("failed to encode fields: {err}")))
}

fn decode_row(id_text: &str, fields_text: &str) -> StoreResult<StoreRow> {
    let record_id = Uuid::parse_str(id_text).map_err(|_| {
        StoreError::InvalidData(format!("invalid uuid value `{id_text}` in records.record_id"))
    })?;

    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(fields_text)
        .map_err(|err| {
            StoreError::InvalidData(format!("invalid fields for record {record_id}: {err}"))
        })?;

    let mut fields = BTreeMap::new();
    for (name, raw) in &object {
        let value = Value::from_json(raw).ok_or_else(|| {
            StoreError::InvalidData(format!(
                "field `{name}` of record {record_id} is not a scalar"
            ))
        })?;
        fields.insert(name.clone(), value);
    }

    Ok(StoreRow { record_id, fields })
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
