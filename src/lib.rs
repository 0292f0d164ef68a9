//! Tablesync - keeps a local SQLite store consistent with a remote managed
//! data store.
//!
//! Replication is polling-based: every tick pulls remote rows newer than the
//! local timestamp watermark and, unless the engine is read-only, pushes
//! locally pending rows back. Last write wins.

pub mod config;
pub mod server;
pub mod store;
pub mod sync;

pub use config::{Config, ConfigError, SanitizedConfig, SyncConfig, TableSyncSpec};
pub use store::{LocalStore, RemoteStore, RowRecord, StoreError, TableStats};
pub use sync::{EngineError, SyncEngine, SyncStatus, TableReport, TickReport};
