use serde::Serialize;

use crate::config::TableSyncSpec;
use crate::store::{strip_reserved, LocalStore, RemoteStore, StoreError};

/// Result of pushing one batch of pending rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

/// Push up to `batch_size` locally pending rows of one table to the remote.
///
/// Rows are pushed one at a time. A row that fails stays pending and is
/// retried on a later tick; only a failure to read the pending set fails the
/// whole call.
pub async fn push_table(
    table: &TableSyncSpec,
    batch_size: usize,
    local: &dyn LocalStore,
    remote: &dyn RemoteStore,
) -> Result<PushOutcome, StoreError> {
    let rows = local.pending_rows(table, batch_size).await?;
    let mut outcome = PushOutcome::default();

    for row in &rows {
        let Some(key) = row.get(&table.primary_key) else {
            tracing::warn!("Skipping {} row without {}", table.name, table.primary_key);
            outcome.failed += 1;
            continue;
        };

        if let Err(e) = remote.upsert_row(table, &strip_reserved(row)).await {
            tracing::warn!("Failed to push {} row {}: {}", table.name, key, e);
            outcome.failed += 1;
            if let Err(e) = local.defer_row(table, key).await {
                tracing::warn!("Failed to defer {} row {}: {}", table.name, key, e);
            }
            continue;
        }

        match local
            .mark_synced(table, key, row.get(&table.timestamp_column))
            .await
        {
            Ok(true) => outcome.succeeded += 1,
            Ok(false) => {
                // Edited while in flight; the newer content goes out next tick
                tracing::debug!("{} row {} changed during push, left pending", table.name, key);
                outcome.succeeded += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to mark {} row {} synced: {}", table.name, key, e);
                outcome.failed += 1;
            }
        }
    }

    Ok(outcome)
}
