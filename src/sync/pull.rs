use crate::config::TableSyncSpec;
use crate::store::{strip_reserved, LocalStore, RemoteStore, StoreError};

/// Pull remote changes for one table into the local store.
///
/// The watermark is the newest timestamp already present locally; every
/// remote row at or after it is upserted locally with its own timestamp,
/// so the watermark only moves as far as rows that were actually read.
/// Returns the number of rows applied.
pub async fn pull_table(
    table: &TableSyncSpec,
    local: &dyn LocalStore,
    remote: &dyn RemoteStore,
) -> Result<usize, StoreError> {
    local.ensure_sync_columns(table).await?;

    let watermark = local.watermark(table).await?;
    let rows = remote.rows_since(table, watermark.as_ref()).await?;

    tracing::debug!(
        "Pulling {}: watermark={:?}, {} remote row(s)",
        table.name,
        watermark,
        rows.len()
    );

    let mut applied = 0;
    for row in &rows {
        local.apply_pulled_row(table, &strip_reserved(row)).await?;
        applied += 1;
    }

    Ok(applied)
}
