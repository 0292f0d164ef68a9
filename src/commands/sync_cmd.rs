//! `tablesync sync`: run one replication pass from the command line.

use clap::Args;

use tablesync::{EngineError, SyncEngine, TableReport};

/// Run one sync tick now
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Only sync this table
    #[arg(long, short)]
    table: Option<String>,
}

impl SyncCommand {
    pub async fn run(&self, engine: &SyncEngine) -> Result<(), SyncCommandError> {
        let reports = match &self.table {
            Some(table) => vec![engine.trigger_now(table).await?],
            None => engine.run_once().await?.tables,
        };

        if engine.config().read_only {
            println!("Syncing (read-only, push disabled)...");
        } else {
            println!("Syncing...");
        }
        println!();

        for report in &reports {
            println!("  {}", summary_line(report));
        }
        println!();

        let failed = reports.iter().filter(|r| !r.is_ok()).count();
        if failed > 0 {
            return Err(SyncCommandError::TablesFailed(failed));
        }
        println!("Sync complete.");
        Ok(())
    }
}

fn summary_line(report: &TableReport) -> String {
    if let Some(error) = &report.error {
        return format!("✗ {}: {}", report.table, error);
    }

    let pulled = report.pulled.unwrap_or(0);
    match report.pushed {
        Some(pushed) => format!(
            "✓ {}: pulled {}, pushed {} ({} failed)",
            report.table, pulled, pushed.succeeded, pushed.failed
        ),
        None => format!("✓ {}: pulled {}", report.table, pulled),
    }
}

/// Errors from sync commands
#[derive(Debug, thiserror::Error)]
pub enum SyncCommandError {
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("{0} table(s) failed to sync")]
    TablesFailed(usize),
}
