//! Store adapters for the two ends of replication.
//!
//! The local side is a SQLite database that carries a sync-status marker per
//! row. The remote side is a managed data store reached over its REST
//! interface; it has no notion of the replication process.
//!
//! Both sides are trait objects so the engine can be driven against in-memory
//! stores in tests.

pub mod rest;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod memory;

pub use rest::RestStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::TableSyncSpec;

/// One tuple from either store, column name -> scalar value, in column order.
pub type RowRecord = serde_json::Map<String, Value>;

/// Reserved local column holding the row's [`crate::sync::SyncStatus`].
pub const SYNC_STATUS_COLUMN: &str = "sync_status";
/// Reserved local column holding the time of the last confirmed remote write.
pub const SYNCED_AT_COLUMN: &str = "synced_at";

/// Errors raised by store adapters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable; retried on the next tick.
    #[error("Connection error: {0}")]
    Connection(String),
    /// Malformed query or missing table/column.
    #[error("Query error: {0}")]
    Query(String),
    /// A single row could not be written.
    #[error("Row write error: {0}")]
    RowWrite(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(e.to_string()),
            _ => StoreError::Query(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Query(e.to_string())
        }
    }
}

/// Per-table counts reported by the control surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub table: String,
    pub total: i64,
    pub synced: i64,
    pub pending: i64,
    pub last_update: Option<Value>,
}

/// The remote end: read changed rows, write rows back.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Verify the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// All rows whose timestamp column is `>= watermark`, or every row when
    /// there is no watermark.
    async fn rows_since(
        &self,
        table: &TableSyncSpec,
        watermark: Option<&Value>,
    ) -> Result<Vec<RowRecord>, StoreError>;

    /// Insert-or-replace keyed by primary key. Must be idempotent.
    async fn upsert_row(&self, table: &TableSyncSpec, row: &RowRecord) -> Result<(), StoreError>;
}

/// The local end: applies pulled rows and tracks which rows still need pushing.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Check the table is usable for replication, adding the reserved
    /// status columns if they are missing.
    async fn ensure_sync_columns(&self, table: &TableSyncSpec) -> Result<(), StoreError>;

    /// `max(timestamp_column)` over non-null values; `None` for an empty table.
    async fn watermark(&self, table: &TableSyncSpec) -> Result<Option<Value>, StoreError>;

    /// Upsert a row read from the remote, writing exactly the columns it
    /// carries, and mark it synced.
    async fn apply_pulled_row(&self, table: &TableSyncSpec, row: &RowRecord)
        -> Result<(), StoreError>;

    /// Rows whose status is unset, `unsynced` or `pending`.
    ///
    /// Rows never attempted come first, then by oldest `synced_at`, then by
    /// key, so rows the remote keeps rejecting rotate behind the rest.
    async fn pending_rows(
        &self,
        table: &TableSyncSpec,
        limit: usize,
    ) -> Result<Vec<RowRecord>, StoreError>;

    /// Record a failed push attempt by stamping `synced_at`, leaving the
    /// status untouched. The row moves to the back of the pending order.
    async fn defer_row(&self, table: &TableSyncSpec, key: &Value) -> Result<(), StoreError>;

    /// Mark a pushed row synced. Returns `false` when the row's timestamp no
    /// longer matches `pushed_timestamp`, i.e. it was edited during the push.
    async fn mark_synced(
        &self,
        table: &TableSyncSpec,
        key: &Value,
        pushed_timestamp: Option<&Value>,
    ) -> Result<bool, StoreError>;

    async fn table_stats(&self, table: &TableSyncSpec) -> Result<TableStats, StoreError>;
}

/// True for plain SQL identifiers: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Double-quote an identifier after validating it.
pub fn quote_ident(name: &str) -> Result<String, StoreError> {
    if is_valid_identifier(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(StoreError::Query(format!("invalid identifier: {:?}", name)))
    }
}

/// Copy of `row` without the reserved local bookkeeping columns.
pub fn strip_reserved(row: &RowRecord) -> RowRecord {
    row.iter()
        .filter(|(column, _)| {
            column.as_str() != SYNC_STATUS_COLUMN && column.as_str() != SYNCED_AT_COLUMN
        })
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("orders"));
        assert!(is_valid_identifier("_private_2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("name\"; --"));
        assert!(!is_valid_identifier("with space"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("updated_at").unwrap(), "\"updated_at\"");
        assert!(matches!(quote_ident("a-b"), Err(StoreError::Query(_))));
    }

    #[test]
    fn test_strip_reserved_keeps_column_order() {
        let row = json!({
            "id": 1,
            "sync_status": "pending",
            "title": "hello",
            "synced_at": null,
            "updated_at": "2024-01-01T00:00:00Z"
        });
        let row = row.as_object().unwrap();

        let stripped = strip_reserved(row);
        let columns: Vec<&str> = stripped.keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["id", "title", "updated_at"]);
    }
}
