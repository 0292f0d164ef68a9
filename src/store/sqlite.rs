//! Local store backed by a SQLite database.
//!
//! Rows are handled generically: columns are decoded by their storage class
//! and written back using exactly the columns present in the row, so the
//! adapter needs no knowledge of the replicated tables beyond their
//! [`TableSyncSpec`].

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Mutex;

use super::{
    quote_ident, LocalStore, RowRecord, StoreError, TableStats, SYNCED_AT_COLUMN,
    SYNC_STATUS_COLUMN,
};
use crate::config::TableSyncSpec;
use crate::sync::SyncStatus;

pub struct SqliteStore {
    pool: SqlitePool,
    /// `(table, primary_key, timestamp_column)` triples already verified
    prepared: Mutex<HashSet<(String, String, String)>>,
}

impl SqliteStore {
    /// Open a pool on `url` (e.g. `sqlite://data.db`), creating the file if needed.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            prepared: Mutex::new(HashSet::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn is_prepared(&self, table: &TableSyncSpec) -> bool {
        self.prepared
            .lock()
            .map(|set| set.contains(&prepared_key(table)))
            .unwrap_or(false)
    }

    fn set_prepared(&self, table: &TableSyncSpec) {
        if let Ok(mut set) = self.prepared.lock() {
            set.insert(prepared_key(table));
        }
    }

    /// Column names of `table` as the database currently sees them.
    async fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)?))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StoreError::from))
            .collect()
    }
}

fn prepared_key(table: &TableSyncSpec) -> (String, String, String) {
    (
        table.name.clone(),
        table.primary_key.clone(),
        table.timestamp_column.clone(),
    )
}

/// `synced_at` value for now. Fixed precision keeps the text sortable.
fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Decode a row column by column according to each value's storage class.
fn decode_row(row: &SqliteRow) -> Result<RowRecord, StoreError> {
    let mut record = RowRecord::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(idx)?),
                "REAL" => Value::from(row.try_get_unchecked::<f64, _>(idx)?),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get_unchecked(idx)?;
                    Value::String(BASE64_STANDARD.encode(bytes))
                }
                _ => Value::String(row.try_get_unchecked::<String, _>(idx)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        // Nested values are stored as their JSON text
        other => query.bind(other.to_string()),
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn ensure_sync_columns(&self, table: &TableSyncSpec) -> Result<(), StoreError> {
        if self.is_prepared(table) {
            return Ok(());
        }

        let quoted = quote_ident(&table.name)?;
        let columns = self.table_columns(&table.name).await?;

        if columns.is_empty() {
            return Err(StoreError::Query(format!(
                "local table '{}' does not exist",
                table.name
            )));
        }
        for required in [&table.primary_key, &table.timestamp_column] {
            if !columns.iter().any(|c| c == required) {
                return Err(StoreError::Query(format!(
                    "local table '{}' has no column '{}'",
                    table.name, required
                )));
            }
        }

        for reserved in [SYNC_STATUS_COLUMN, SYNCED_AT_COLUMN] {
            if !columns.iter().any(|c| c == reserved) {
                tracing::info!("Adding column {} to local table {}", reserved, table.name);
                sqlx::query(&format!(
                    "ALTER TABLE {} ADD COLUMN {} TEXT",
                    quoted,
                    quote_ident(reserved)?
                ))
                .execute(&self.pool)
                .await?;
            }
        }

        self.set_prepared(table);
        Ok(())
    }

    async fn watermark(&self, table: &TableSyncSpec) -> Result<Option<Value>, StoreError> {
        let ts = quote_ident(&table.timestamp_column)?;
        let sql = format!(
            "SELECT MAX({ts}) AS watermark FROM {} WHERE {ts} IS NOT NULL",
            quote_ident(&table.name)?
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let watermark = decode_row(&row)?
            .remove("watermark")
            .filter(|v| !v.is_null());
        Ok(watermark)
    }

    async fn apply_pulled_row(
        &self,
        table: &TableSyncSpec,
        row: &RowRecord,
    ) -> Result<(), StoreError> {
        if !row.contains_key(&table.primary_key) {
            return Err(StoreError::RowWrite(format!(
                "row for '{}' has no '{}' value",
                table.name, table.primary_key
            )));
        }

        let mut columns = Vec::with_capacity(row.len() + 2);
        let mut updates = Vec::with_capacity(row.len() + 2);
        for column in row.keys() {
            let quoted = quote_ident(column)?;
            if column != &table.primary_key {
                updates.push(format!("{q} = excluded.{q}", q = quoted));
            }
            columns.push(quoted);
        }
        for reserved in [SYNC_STATUS_COLUMN, SYNCED_AT_COLUMN] {
            let quoted = quote_ident(reserved)?;
            updates.push(format!("{q} = excluded.{q}", q = quoted));
            columns.push(quoted);
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
            quote_ident(&table.name)?,
            columns.join(", "),
            placeholders,
            quote_ident(&table.primary_key)?,
            updates.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for value in row.values() {
            query = bind_value(query, value);
        }
        query = query
            .bind(SyncStatus::Synced.as_str())
            .bind(now_stamp());

        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn pending_rows(
        &self,
        table: &TableSyncSpec,
        limit: usize,
    ) -> Result<Vec<RowRecord>, StoreError> {
        // Explicit columns: pooled connections may hold a `SELECT *` prepared
        // before the reserved columns were added
        let columns = self
            .table_columns(&table.name)
            .await?
            .iter()
            .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
            .collect::<Vec<_>>();
        if columns.is_empty() {
            return Err(StoreError::Query(format!(
                "local table '{}' does not exist",
                table.name
            )));
        }
        let status = quote_ident(SYNC_STATUS_COLUMN)?;
        let attempted = quote_ident(SYNCED_AT_COLUMN)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {status} IS NULL OR {status} IN (?, ?) \
             ORDER BY {attempted} IS NOT NULL, {attempted}, {} LIMIT ?",
            columns.join(", "),
            quote_ident(&table.name)?,
            quote_ident(&table.primary_key)?
        );
        let rows = sqlx::query(&sql)
            .bind(SyncStatus::Unsynced.as_str())
            .bind(SyncStatus::Pending.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn defer_row(&self, table: &TableSyncSpec, key: &Value) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            quote_ident(&table.name)?,
            quote_ident(SYNCED_AT_COLUMN)?,
            quote_ident(&table.primary_key)?
        );
        let query = sqlx::query(&sql).bind(now_stamp());
        bind_value(query, key).execute(&self.pool).await?;
        Ok(())
    }

    async fn mark_synced(
        &self,
        table: &TableSyncSpec,
        key: &Value,
        pushed_timestamp: Option<&Value>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET {} = ?, {} = ? WHERE {} = ? AND {} IS ?",
            quote_ident(&table.name)?,
            quote_ident(SYNC_STATUS_COLUMN)?,
            quote_ident(SYNCED_AT_COLUMN)?,
            quote_ident(&table.primary_key)?,
            quote_ident(&table.timestamp_column)?
        );
        let query = sqlx::query(&sql)
            .bind(SyncStatus::Synced.as_str())
            .bind(now_stamp());
        let query = bind_value(query, key);
        let query = bind_value(query, pushed_timestamp.unwrap_or(&Value::Null));

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn table_stats(&self, table: &TableSyncSpec) -> Result<TableStats, StoreError> {
        let sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN {} = ? THEN 1 ELSE 0 END), 0) FROM {}",
            quote_ident(SYNC_STATUS_COLUMN)?,
            quote_ident(&table.name)?
        );
        let (total, synced): (i64, i64) = sqlx::query_as(&sql)
            .bind(SyncStatus::Synced.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(TableStats {
            table: table.name.clone(),
            total,
            synced,
            pending: total - synced,
            last_update: self.watermark(table).await?,
        })
    }
}
