//! Remote store client for a PostgREST-style managed data store.
//!
//! Tables are exposed at `<remote_url>/rest/v1/<table>`. Reads use column
//! filters (`updated_at=gte.<value>`) and `limit`/`offset` paging; writes use
//! `POST` with `Prefer: resolution=merge-duplicates`, which makes them
//! insert-or-replace keyed by the `on_conflict` column.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

use super::{is_valid_identifier, RemoteStore, RowRecord, StoreError};
use crate::config::TableSyncSpec;

/// Rows requested per page when reading a table.
pub const PAGE_SIZE: usize = 1000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RestStore {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn table_url(&self, table: &str) -> Result<String, StoreError> {
        if !is_valid_identifier(table) {
            return Err(StoreError::Query(format!("invalid table name: {:?}", table)));
        }
        Ok(format!("{}/rest/v1/{}", self.base_url, table))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }
}

/// Render a watermark for use inside a PostgREST filter.
fn filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turn a non-success response into the matching [`StoreError`].
async fn error_for_status(response: Response, row_write: bool) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("remote returned {}: {}", status, body.trim());

    if status.is_server_error()
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
    {
        Err(StoreError::Connection(message))
    } else if row_write {
        Err(StoreError::RowWrite(message))
    } else {
        Err(StoreError::Query(message))
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let url = format!("{}/rest/v1/", self.base_url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Connection(format!(
                "remote returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn rows_since(
        &self,
        table: &TableSyncSpec,
        watermark: Option<&Value>,
    ) -> Result<Vec<RowRecord>, StoreError> {
        let url = self.table_url(&table.name)?;
        let order = format!("{}.asc,{}.asc", table.timestamp_column, table.primary_key);

        let mut rows = Vec::new();
        let mut offset = 0;
        loop {
            let mut params = vec![
                ("select".to_string(), "*".to_string()),
                ("order".to_string(), order.clone()),
                ("limit".to_string(), PAGE_SIZE.to_string()),
                ("offset".to_string(), offset.to_string()),
            ];
            if let Some(watermark) = watermark {
                params.push((
                    table.timestamp_column.clone(),
                    format!("gte.{}", filter_value(watermark)),
                ));
            }

            let response = self
                .authorize(self.client.get(&url))
                .query(&params)
                .send()
                .await?;
            let page: Vec<RowRecord> = error_for_status(response, false).await?.json().await?;

            let fetched = page.len();
            rows.extend(page);
            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        tracing::debug!("Fetched {} remote row(s) from {}", rows.len(), table.name);
        Ok(rows)
    }

    async fn upsert_row(&self, table: &TableSyncSpec, row: &RowRecord) -> Result<(), StoreError> {
        let url = self.table_url(&table.name)?;
        let response = self
            .authorize(self.client.post(&url))
            .query(&[("on_conflict", table.primary_key.as_str())])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await?;

        error_for_status(response, true).await?;
        Ok(())
    }
}
