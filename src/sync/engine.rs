//! The sync engine: owns the store adapters, runs ticks on a schedule and
//! answers the control surface.
//!
//! Scheduling is completion-relative: the next tick is armed only after the
//! previous one has finished, and every tick body (scheduled, manual or
//! one-shot) runs under the same guard, so at most one executes at a time.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};

use super::tick::{run_tick, sync_table, TableReport, TickReport};
use crate::config::SyncConfig;
use crate::store::{LocalStore, RemoteStore, RestStore, SqliteStore, StoreError, TableStats};

/// Errors surfaced to callers of the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("table not configured")]
    TableNotConfigured(String),
    #[error("a sync tick is already in progress")]
    Busy,
    #[error("failed to connect to {store} store: {source}")]
    Connect {
        store: &'static str,
        source: StoreError,
    },
    #[error("sync tick panicked: {0}")]
    TickPanicked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Mutable run state, written only by the engine.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRunState {
    pub running: bool,
    /// Whether `start` has ever succeeded on this engine
    pub started: bool,
    pub last_tick_started_at: Option<DateTime<Utc>>,
    pub last_tick_finished_at: Option<DateTime<Utc>>,
    pub last_tick_error: Option<String>,
    pub last_report: Option<TickReport>,
}

/// Snapshot returned by [`SyncEngine::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub running: bool,
    pub tables: Vec<TableStats>,
    pub run_state: EngineRunState,
}

struct Inner {
    config: SyncConfig,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    /// Held for the whole body of any tick
    tick_guard: Mutex<()>,
    /// Stop signal of the running loop; `Some` while running
    control: Mutex<Option<watch::Sender<bool>>>,
    state: RwLock<EngineRunState>,
    /// Last successful measurement per table
    last_stats: Mutex<HashMap<String, TableStats>>,
}

/// Cloneable handle to one engine instance.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                local,
                remote,
                tick_guard: Mutex::new(()),
                control: Mutex::new(None),
                state: RwLock::new(EngineRunState::default()),
                last_stats: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Build the SQLite and REST adapters described by `config`.
    pub async fn connect(config: SyncConfig) -> Result<Self, EngineError> {
        let local = SqliteStore::connect(&config.local_url)
            .await
            .map_err(|source| EngineError::Connect {
                store: "local",
                source,
            })?;
        let remote = RestStore::new(&config.remote_url, &config.remote_key).map_err(|source| {
            EngineError::Connect {
                store: "remote",
                source,
            }
        })?;
        Ok(Self::new(config, Arc::new(local), Arc::new(remote)))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Start the scheduled loop. Calling it while running is a no-op.
    ///
    /// Both stores must answer a ping first. The first tick runs immediately.
    pub async fn start(&self) -> Result<StartOutcome, EngineError> {
        let mut control = self.inner.control.lock().await;
        if control.is_some() {
            return Ok(StartOutcome::AlreadyRunning);
        }

        self.inner
            .local
            .ping()
            .await
            .map_err(|source| EngineError::Connect {
                store: "local",
                source,
            })?;
        self.inner
            .remote
            .ping()
            .await
            .map_err(|source| EngineError::Connect {
                store: "remote",
                source,
            })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        *control = Some(stop_tx);
        {
            let mut state = self.inner.state.write().await;
            state.running = true;
            state.started = true;
        }

        tracing::info!(
            "Sync engine started: {} table(s), every {:?}{}",
            self.inner.config.tables.len(),
            self.inner.config.tick_interval,
            if self.inner.config.read_only {
                " (read-only)"
            } else {
                ""
            }
        );
        tokio::spawn(run_loop(self.inner.clone(), stop_rx));

        Ok(StartOutcome::Started)
    }

    /// Cancel the pending next tick. A tick in flight is left to finish.
    ///
    /// Returns `false` if the engine was not running.
    pub async fn stop(&self) -> bool {
        let mut control = self.inner.control.lock().await;
        let Some(stop_tx) = control.take() else {
            return false;
        };
        let _ = stop_tx.send(true);
        self.inner.state.write().await.running = false;
        tracing::info!("Sync engine stopped");
        true
    }

    /// Run one tick for a single table outside the schedule.
    ///
    /// The name is checked before anything touches a store, and the call is
    /// rejected rather than queued if another tick is executing.
    pub async fn trigger_now(&self, table: &str) -> Result<TableReport, EngineError> {
        let spec = self
            .inner
            .config
            .table(table)
            .ok_or_else(|| EngineError::TableNotConfigured(table.to_string()))?;
        let Ok(_guard) = self.inner.tick_guard.try_lock() else {
            return Err(EngineError::Busy);
        };

        tracing::info!("Manual sync of {}", spec.name);
        let config = &self.inner.config;
        let result = AssertUnwindSafe(sync_table(
            spec,
            config.read_only,
            config.push_batch_size,
            self.inner.local.as_ref(),
            self.inner.remote.as_ref(),
        ))
        .catch_unwind()
        .await;

        match result {
            Ok(report) => Ok(report),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Manual sync of {} panicked: {}", spec.name, message);
                self.inner.state.write().await.last_tick_error = Some(message.clone());
                Err(EngineError::TickPanicked(message))
            }
        }
    }

    /// Run one full tick now, waiting for any tick in flight to finish first.
    pub async fn run_once(&self) -> Result<TickReport, EngineError> {
        self.inner.tick().await
    }

    pub async fn run_state(&self) -> EngineRunState {
        self.inner.state.read().await.clone()
    }

    /// Per-table counts for every configured table, in configuration order.
    ///
    /// A table whose measurement fails reports its last successful
    /// measurement instead, or is omitted if it has never been measured.
    pub async fn table_stats(&self) -> Vec<TableStats> {
        let mut cache = self.inner.last_stats.lock().await;
        let mut tables = Vec::with_capacity(self.inner.config.tables.len());

        for spec in &self.inner.config.tables {
            match self.inner.local.table_stats(spec).await {
                Ok(stats) => {
                    cache.insert(spec.name.clone(), stats.clone());
                    tables.push(stats);
                }
                Err(e) => {
                    tracing::warn!("Failed to measure {}: {}", spec.name, e);
                    if let Some(previous) = cache.get(&spec.name) {
                        tables.push(previous.clone());
                    }
                }
            }
        }

        tables
    }

    /// Engine status for the control surface. Before the first start no
    /// store is queried.
    pub async fn status(&self) -> EngineStatus {
        let run_state = self.run_state().await;
        let tables = if run_state.started {
            self.table_stats().await
        } else {
            Vec::new()
        };

        EngineStatus {
            running: run_state.running,
            tables,
            run_state,
        }
    }
}

impl Inner {
    /// One guarded tick. Panics are caught here and recorded.
    async fn tick(&self) -> Result<TickReport, EngineError> {
        let _guard = self.tick_guard.lock().await;
        self.state.write().await.last_tick_started_at = Some(Utc::now());

        let result = AssertUnwindSafe(run_tick(
            &self.config,
            self.local.as_ref(),
            self.remote.as_ref(),
        ))
        .catch_unwind()
        .await;

        let mut state = self.state.write().await;
        state.last_tick_finished_at = Some(Utc::now());
        match result {
            Ok(report) => {
                state.last_tick_error = None;
                state.last_report = Some(report.clone());
                Ok(report)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Sync tick panicked: {}", message);
                state.last_tick_error = Some(message.clone());
                Err(EngineError::TickPanicked(message))
            }
        }
    }
}

async fn run_loop(inner: Arc<Inner>, mut stop_rx: watch::Receiver<bool>) {
    loop {
        // Already recorded in the run state
        let _ = inner.tick().await;

        if *stop_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(inner.config.tick_interval) => {}
            _ = stop_rx.changed() => break,
        }
    }
    tracing::debug!("Sync loop exited");
}
