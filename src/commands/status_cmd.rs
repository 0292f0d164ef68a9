use clap::Args;

use super::config_cmd::OutputFormat;
use tablesync::{SyncEngine, TableStats};

/// Show per-table sync counts from the local store
#[derive(Args)]
pub struct StatusCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl StatusCommand {
    pub async fn run(&self, engine: &SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
        let tables = engine.table_stats().await;

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            }
            OutputFormat::Text => {
                println!("Sync Status");
                println!("===========");
                println!();
                if tables.is_empty() {
                    println!("No tables could be measured.");
                }
                for stats in &tables {
                    println!("{}", status_line(stats));
                }
            }
        }
        Ok(())
    }
}

fn status_line(stats: &TableStats) -> String {
    let last_update = match &stats.last_update {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "never".to_string(),
    };
    format!(
        "{:<24} total {:>6}  synced {:>6}  pending {:>6}  last update {}",
        stats.table, stats.total, stats.synced, stats.pending, last_update
    )
}
