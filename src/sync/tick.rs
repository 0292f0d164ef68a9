use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{pull_table, push_table, PushOutcome};
use crate::config::{SyncConfig, TableSyncSpec};
use crate::store::{LocalStore, RemoteStore};

/// What happened to one table during a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReport {
    pub table: String,
    /// Rows applied locally, `None` if the pull failed
    pub pulled: Option<usize>,
    /// `None` when read-only or when the push did not run
    pub pushed: Option<PushOutcome>,
    pub error: Option<String>,
}

impl TableReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub read_only: bool,
    pub tables: Vec<TableReport>,
}

impl TickReport {
    pub fn failed_tables(&self) -> usize {
        self.tables.iter().filter(|t| !t.is_ok()).count()
    }
}

/// Pull, then push unless read-only, for a single table.
///
/// Never fails: errors end up in the report. A failed pull skips the push
/// for this tick.
pub async fn sync_table(
    table: &TableSyncSpec,
    read_only: bool,
    batch_size: usize,
    local: &dyn LocalStore,
    remote: &dyn RemoteStore,
) -> TableReport {
    let mut report = TableReport {
        table: table.name.clone(),
        pulled: None,
        pushed: None,
        error: None,
    };

    match pull_table(table, local, remote).await {
        Ok(applied) => report.pulled = Some(applied),
        Err(e) => {
            tracing::warn!("Pull failed for {}: {}", table.name, e);
            report.error = Some(format!("pull: {}", e));
            return report;
        }
    }

    if read_only {
        return report;
    }

    match push_table(table, batch_size, local, remote).await {
        Ok(outcome) => {
            if outcome.failed > 0 {
                tracing::warn!(
                    "Push for {}: {} row(s) failed, {} succeeded",
                    table.name,
                    outcome.failed,
                    outcome.succeeded
                );
            }
            report.pushed = Some(outcome);
        }
        Err(e) => {
            tracing::warn!("Push failed for {}: {}", table.name, e);
            report.error = Some(format!("push: {}", e));
        }
    }

    report
}

/// Run one pass over every configured table, in configuration order.
pub async fn run_tick(
    config: &SyncConfig,
    local: &dyn LocalStore,
    remote: &dyn RemoteStore,
) -> TickReport {
    let started_at = Utc::now();
    let mut tables = Vec::with_capacity(config.tables.len());

    for table in &config.tables {
        let report = sync_table(
            table,
            config.read_only,
            config.push_batch_size,
            local,
            remote,
        )
        .await;
        tables.push(report);
    }

    let report = TickReport {
        started_at,
        finished_at: Utc::now(),
        read_only: config.read_only,
        tables,
    };

    let pulled: usize = report.tables.iter().filter_map(|t| t.pulled).sum();
    let pushed: usize = report
        .tables
        .iter()
        .filter_map(|t| t.pushed.map(|p| p.succeeded))
        .sum();
    tracing::info!(
        "Tick finished: {} table(s), {} pulled, {} pushed, {} failed",
        report.tables.len(),
        pulled,
        pushed,
        report.failed_tables()
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::SqliteStore;
    use serde_json::json;
    use std::time::Duration;

    fn config(read_only: bool, tables: &[&str]) -> SyncConfig {
        SyncConfig {
            remote_url: "http://remote".to_string(),
            remote_key: "key".to_string(),
            local_url: "sqlite://local.db".to_string(),
            tick_interval: Duration::from_secs(1),
            read_only,
            push_batch_size: 100,
            tables: tables
                .iter()
                .map(|t| TableSyncSpec::new(t, "id", "updated_at"))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_tick_pulls_then_pushes() {
        let local = MemoryStore::new();
        let remote = MemoryStore::new();
        remote.insert("orders", json!({"id": 1, "updated_at": "T1"}));
        local.insert(
            "orders",
            json!({"id": 2, "updated_at": "T0", "sync_status": "pending"}),
        );

        let report = run_tick(&config(false, &["orders"]), &local, &remote).await;

        assert_eq!(report.failed_tables(), 0);
        assert_eq!(report.tables[0].pulled, Some(1));
        // The freshly pulled row is already synced, only row 2 is pushed
        assert_eq!(
            report.tables[0].pushed,
            Some(PushOutcome { succeeded: 1, failed: 0 })
        );
        assert!(remote.find("orders", "id", &json!(2)).is_some());
    }

    #[tokio::test]
    async fn test_failing_table_does_not_stop_the_tick() {
        let local = MemoryStore::new();
        let remote = MemoryStore::new();
        local.create_table("users");
        remote.insert("users", json!({"id": 1, "updated_at": "T1"}));
        // "orders" does not exist locally

        let report = run_tick(&config(false, &["orders", "users"]), &local, &remote).await;

        assert_eq!(report.tables.len(), 2);
        assert!(report.tables[0].error.as_deref().unwrap().starts_with("pull:"));
        assert_eq!(report.tables[0].pushed, None);
        assert!(report.tables[1].is_ok());
        assert_eq!(report.tables[1].pulled, Some(1));
        assert_eq!(report.failed_tables(), 1);
    }

    #[tokio::test]
    async fn test_read_only_never_writes_remote() {
        let local = MemoryStore::new();
        let remote = MemoryStore::new();
        for id in 0..10 {
            local.insert(
                "orders",
                json!({"id": id, "updated_at": "T0", "sync_status": "pending"}),
            );
        }
        remote.create_table("orders");
        let config = config(true, &["orders"]);

        for tick in 1..=5 {
            remote.insert("orders", json!({"id": 100 + tick, "updated_at": format!("T{}", tick)}));
            let report = run_tick(&config, &local, &remote).await;
            assert!(report.read_only);
            assert_eq!(report.tables[0].pushed, None);
        }

        assert_eq!(remote.writes(), 0);
        assert_eq!(remote.rows("orders").len(), 5);
        let pending = local
            .rows("orders")
            .iter()
            .filter(|r| r.get("sync_status") == Some(&json!("pending")))
            .count();
        assert_eq!(pending, 10);
        for tick in 1..=5 {
            assert!(local.find("orders", "id", &json!(100 + tick)).is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_tick_against_sqlite_pushes_every_pending_row() {
        let temp_dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", temp_dir.path().join("local.db").display());
        let local = SqliteStore::connect(&url).await.unwrap();
        sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY, total INTEGER, updated_at TEXT)")
            .execute(local.pool())
            .await
            .unwrap();
        for id in 1..=3 {
            sqlx::query("INSERT INTO orders (id, total, updated_at) VALUES (?, ?, 'T1')")
                .bind(id)
                .bind(id * 10)
                .execute(local.pool())
                .await
                .unwrap();
        }
        // Open the other pooled connections before the reserved columns exist
        let warm: Vec<_> = (0..5)
            .map(|_| sqlx::query("SELECT * FROM orders").fetch_all(local.pool()))
            .collect();
        futures::future::join_all(warm).await;

        let remote = MemoryStore::new();
        remote.create_table("orders");

        let report = run_tick(&config(false, &["orders"]), &local, &remote).await;

        assert_eq!(report.failed_tables(), 0);
        assert_eq!(report.tables[0].pulled, Some(0));
        assert_eq!(
            report.tables[0].pushed,
            Some(PushOutcome { succeeded: 3, failed: 0 })
        );
        assert_eq!(remote.rows("orders").len(), 3);
        assert_eq!(
            remote.find("orders", "id", &json!(2)).unwrap()["total"],
            json!(20)
        );
        let stats = local.table_stats(&config(false, &["orders"]).tables[0]).await.unwrap();
        assert_eq!(stats.synced, 3);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_reported_per_table() {
        let local = MemoryStore::new();
        let remote = MemoryStore::new();
        local.create_table("orders");
        local.create_table("users");
        remote.set_unreachable(true);

        let report = run_tick(&config(false, &["orders", "users"]), &local, &remote).await;
        assert_eq!(report.failed_tables(), 2);
        assert!(report.tables[1]
            .error
            .as_deref()
            .unwrap()
            .contains("Connection error"));
    }
}
