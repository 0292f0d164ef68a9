//! Replication between the local and remote stores.
//!
//! Each tick walks the configured tables in order. For every table it pulls
//! remote rows newer than the local watermark, then (unless read-only) pushes
//! local rows that have not been confirmed remotely. Failures are isolated:
//! a bad row never aborts its batch, and a failing table never aborts the tick.

mod engine;
mod pull;
mod push;
mod tick;

pub use engine::{EngineError, EngineRunState, EngineStatus, StartOutcome, SyncEngine};
pub use pull::pull_table;
pub use push::{push_table, PushOutcome};
pub use tick::{run_tick, sync_table, TableReport, TickReport};

/// Per-row replication marker stored in the local `sync_status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Never pushed (also what a NULL column means)
    Unsynced,
    /// Edited locally, waiting for the next push
    Pending,
    /// Current content is confirmed written remotely
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Unsynced => "unsynced",
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unsynced" => Some(SyncStatus::Unsynced),
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
