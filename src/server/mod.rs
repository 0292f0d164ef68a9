//! HTTP control surface for a [`SyncEngine`].
//!
//! # Endpoints
//!
//! - `POST /start`: start the scheduled loop
//! - `POST /stop`: stop it after the current tick
//! - `GET /status`: per-table counts and the last tick
//! - `POST /sync-table/{name}`: sync one configured table now
//! - `GET /config`: configuration with credentials masked
//! - `GET /health`: liveness check
//!
//! Every error response is `{"success": false, "message": ...}`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::config::SanitizedConfig;
use crate::store::TableStats;
use crate::sync::{EngineError, StartOutcome, SyncEngine, TableReport};

/// Build the control API around an engine instance.
pub fn router(engine: SyncEngine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .route("/sync-table/{name}", post(sync_table))
        .route("/config", get(config))
        .with_state(engine)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Responses
// ============================================================================

/// Error body shared by every endpoint
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                success: false,
                message: self.message,
            }),
        )
            .into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::TableNotConfigured(_) => StatusCode::BAD_REQUEST,
            EngineError::Busy => StatusCode::CONFLICT,
            EngineError::Connect { .. } | EngineError::TickPanicked(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

#[derive(Serialize)]
struct MessageResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct StartResponse {
    success: bool,
    message: String,
    config: SanitizedConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LastTick {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    tables: Vec<TableReport>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    success: bool,
    running: bool,
    status: Vec<TableStats>,
    config: SanitizedConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_tick: Option<LastTick>,
}

#[derive(Serialize)]
struct SyncTableResponse {
    success: bool,
    message: String,
    report: TableReport,
}

#[derive(Serialize)]
struct ConfigResponse {
    success: bool,
    config: SanitizedConfig,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn start(State(engine): State<SyncEngine>) -> Result<Json<StartResponse>, ApiError> {
    let message = match engine.start().await? {
        StartOutcome::Started => "Sync engine started",
        StartOutcome::AlreadyRunning => "Sync engine already running",
    };
    Ok(Json(StartResponse {
        success: true,
        message: message.to_string(),
        config: engine.config().sanitized(),
    }))
}

async fn stop(State(engine): State<SyncEngine>) -> Json<MessageResponse> {
    let message = if engine.stop().await {
        "Sync engine stopped"
    } else {
        "Sync engine was not running"
    };
    Json(MessageResponse {
        success: true,
        message: message.to_string(),
    })
}

async fn status(State(engine): State<SyncEngine>) -> Json<StatusResponse> {
    let status = engine.status().await;
    let run_state = status.run_state;

    let last_tick = run_state.last_tick_started_at.map(|started_at| LastTick {
        started_at: Some(started_at),
        finished_at: run_state.last_tick_finished_at,
        error: run_state.last_tick_error.clone(),
        tables: run_state
            .last_report
            .map(|report| report.tables)
            .unwrap_or_default(),
    });

    Json(StatusResponse {
        success: true,
        running: status.running,
        status: status.tables,
        config: engine.config().sanitized(),
        last_tick,
    })
}

async fn sync_table(
    State(engine): State<SyncEngine>,
    Path(name): Path<String>,
) -> Result<Json<SyncTableResponse>, ApiError> {
    let report = engine.trigger_now(&name).await.map_err(|e| {
        tracing::warn!("Rejected manual sync of {}: {}", name, e);
        ApiError::from(e)
    })?;

    let message = match &report.error {
        Some(error) => format!("Sync of {} failed: {}", name, error),
        None => format!("Synced table {}", name),
    };
    Ok(Json(SyncTableResponse {
        success: report.is_ok(),
        message,
        report,
    }))
}

async fn config(State(engine): State<SyncEngine>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        success: true,
        config: engine.config().sanitized(),
    })
}
