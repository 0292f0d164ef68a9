//! In-memory store used by the engine tests.
//!
//! Implements both store traits so a pair of instances can stand in for the
//! local and remote ends. Every trait call is counted, writes are counted
//! separately, and failures can be injected per row or for the whole store.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{
    LocalStore, RemoteStore, RowRecord, StoreError, TableStats, SYNCED_AT_COLUMN,
    SYNC_STATUS_COLUMN,
};
use crate::config::TableSyncSpec;
use crate::sync::SyncStatus;

#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<RowRecord>>>,
    reject_keys: Mutex<Vec<Value>>,
    calls: AtomicUsize,
    writes: AtomicUsize,
    /// Source of increasing `synced_at` stamps
    clock: AtomicUsize,
    unreachable: AtomicBool,
    panic_on_read: AtomicBool,
    /// Held for writing by a test to stall every store call
    pub(crate) gate: tokio::sync::RwLock<()>,
}

pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<CmpOrdering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create_table(&self, table: &str) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default();
    }

    pub(crate) fn insert(&self, table: &str, row: Value) {
        let row = row.as_object().cloned().unwrap_or_default();
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub(crate) fn rows(&self, table: &str) -> Vec<RowRecord> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn find(&self, table: &str, key_column: &str, key: &Value) -> Option<RowRecord> {
        self.rows(table)
            .into_iter()
            .find(|r| r.get(key_column) == Some(key))
    }

    pub(crate) fn reject(&self, key: Value) {
        self.reject_keys.lock().unwrap().push(key);
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub(crate) fn set_panic_on_read(&self, panic: bool) {
        self.panic_on_read.store(panic, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn stamp(&self) -> Value {
        Value::from(self.clock.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _open = self.gate.read().await;
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("memory store offline".to_string()));
        }
        Ok(())
    }

    fn table_rows(&self, table: &str) -> Result<Vec<RowRecord>, StoreError> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::Query(format!("no such table: {}", table)))
    }

    /// Merge `row` into the row with the same key, or append it.
    fn merge(&self, table: &TableSyncSpec, row: RowRecord) -> Result<(), StoreError> {
        let key = row
            .get(&table.primary_key)
            .cloned()
            .ok_or_else(|| StoreError::RowWrite("row has no primary key".to_string()))?;
        let mut tables = self.tables.lock().unwrap();
        let rows = tables
            .get_mut(&table.name)
            .ok_or_else(|| StoreError::Query(format!("no such table: {}", table.name)))?;
        match rows
            .iter_mut()
            .find(|r| r.get(&table.primary_key) == Some(&key))
        {
            Some(existing) => {
                for (column, value) in row {
                    existing.insert(column, value);
                }
            }
            None => rows.push(row),
        }
        Ok(())
    }
}

fn status_of(row: &RowRecord) -> SyncStatus {
    row.get(SYNC_STATUS_COLUMN)
        .and_then(Value::as_str)
        .and_then(SyncStatus::parse)
        .unwrap_or(SyncStatus::Unsynced)
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.enter().await
    }

    async fn rows_since(
        &self,
        table: &TableSyncSpec,
        watermark: Option<&Value>,
    ) -> Result<Vec<RowRecord>, StoreError> {
        self.enter().await?;
        let mut rows: Vec<RowRecord> = self
            .table_rows(&table.name)?
            .into_iter()
            .filter(|r| match (watermark, r.get(&table.timestamp_column)) {
                (None, _) => true,
                (Some(w), Some(ts)) => {
                    matches!(compare_values(ts, w), Some(CmpOrdering::Greater | CmpOrdering::Equal))
                }
                (Some(_), None) => false,
            })
            .collect();
        rows.sort_by(|a, b| {
            match (a.get(&table.timestamp_column), b.get(&table.timestamp_column)) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(CmpOrdering::Equal),
                _ => CmpOrdering::Equal,
            }
        });
        Ok(rows)
    }

    async fn upsert_row(&self, table: &TableSyncSpec, row: &RowRecord) -> Result<(), StoreError> {
        self.enter().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(key) = row.get(&table.primary_key) {
            if self.reject_keys.lock().unwrap().contains(key) {
                return Err(StoreError::RowWrite(format!("constraint violation for {}", key)));
            }
        }
        self.merge(table, row.clone())
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.enter().await
    }

    async fn ensure_sync_columns(&self, table: &TableSyncSpec) -> Result<(), StoreError> {
        self.enter().await?;
        self.table_rows(&table.name).map(|_| ())
    }

    async fn watermark(&self, table: &TableSyncSpec) -> Result<Option<Value>, StoreError> {
        self.enter().await?;
        if self.panic_on_read.load(Ordering::SeqCst) {
            panic!("memory store asked to panic");
        }
        let rows = self.table_rows(&table.name)?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get(&table.timestamp_column))
            .filter(|v| !v.is_null())
            .fold(None, |max: Option<&Value>, v| match max {
                Some(m) if compare_values(v, m) != Some(CmpOrdering::Greater) => Some(m),
                _ => Some(v),
            })
            .cloned())
    }

    async fn apply_pulled_row(
        &self,
        table: &TableSyncSpec,
        row: &RowRecord,
    ) -> Result<(), StoreError> {
        self.enter().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut row = row.clone();
        row.insert(
            SYNC_STATUS_COLUMN.to_string(),
            Value::from(SyncStatus::Synced.as_str()),
        );
        row.insert(SYNCED_AT_COLUMN.to_string(), self.stamp());
        self.merge(table, row)
    }

    async fn pending_rows(
        &self,
        table: &TableSyncSpec,
        limit: usize,
    ) -> Result<Vec<RowRecord>, StoreError> {
        self.enter().await?;
        let mut rows: Vec<RowRecord> = self
            .table_rows(&table.name)?
            .into_iter()
            .filter(|r| status_of(r) != SyncStatus::Synced)
            .collect();
        let attempted = |r: &RowRecord| r.get(SYNCED_AT_COLUMN).filter(|v| !v.is_null()).cloned();
        rows.sort_by(|a, b| {
            let by_attempt = match (attempted(a), attempted(b)) {
                (None, None) => CmpOrdering::Equal,
                (None, Some(_)) => CmpOrdering::Less,
                (Some(_), None) => CmpOrdering::Greater,
                (Some(x), Some(y)) => compare_values(&x, &y).unwrap_or(CmpOrdering::Equal),
            };
            by_attempt.then_with(|| {
                match (a.get(&table.primary_key), b.get(&table.primary_key)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(CmpOrdering::Equal),
                    _ => CmpOrdering::Equal,
                }
            })
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn defer_row(&self, table: &TableSyncSpec, key: &Value) -> Result<(), StoreError> {
        self.enter().await?;
        let stamp = self.stamp();
        let mut tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get_mut(&table.name) else {
            return Err(StoreError::Query(format!("no such table: {}", table.name)));
        };
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.get(&table.primary_key) == Some(key))
        {
            row.insert(SYNCED_AT_COLUMN.to_string(), stamp);
        }
        Ok(())
    }

    async fn mark_synced(
        &self,
        table: &TableSyncSpec,
        key: &Value,
        pushed_timestamp: Option<&Value>,
    ) -> Result<bool, StoreError> {
        self.enter().await?;
        let mut tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get_mut(&table.name) else {
            return Err(StoreError::Query(format!("no such table: {}", table.name)));
        };
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.get(&table.primary_key) == Some(key))
        else {
            return Ok(false);
        };
        let current = row.get(&table.timestamp_column).filter(|v| !v.is_null());
        if current != pushed_timestamp.filter(|v| !v.is_null()) {
            return Ok(false);
        }
        row.insert(
            SYNC_STATUS_COLUMN.to_string(),
            Value::from(SyncStatus::Synced.as_str()),
        );
        row.insert(SYNCED_AT_COLUMN.to_string(), self.stamp());
        Ok(true)
    }

    async fn table_stats(&self, table: &TableSyncSpec) -> Result<TableStats, StoreError> {
        let last_update = self.watermark(table).await?;
        let rows = self.table_rows(&table.name)?;
        let total = rows.len() as i64;
        let synced = rows
            .iter()
            .filter(|r| status_of(r) == SyncStatus::Synced)
            .count() as i64;
        Ok(TableStats {
            table: table.name.clone(),
            total,
            synced,
            pending: total - synced,
            last_update,
        })
    }
}
