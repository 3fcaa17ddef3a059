//! Research run API handlers
//!
//! POST /runs, GET /runs, GET /runs/:run_id, POST /runs/cancel

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use nxt_common::db::{ResearchRun, RunStatus};
use serde::{Deserialize, Serialize};

use crate::{
    db,
    error::{ApiError, ApiResult},
    AppState,
};

/// Largest page served by GET /runs
const MAX_RUNS_LIMIT: i64 = 200;

/// POST /runs response
#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: i64,
    pub status: RunStatus,
}

/// GET /runs query
#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// GET /runs response
#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub active_run: Option<i64>,
    pub runs: Vec<ResearchRun>,
}

/// POST /runs/cancel response
#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub run_id: i64,
    pub cancelling: bool,
}

/// POST /runs
///
/// Starts a run in the background. Returns 202 Accepted with the run id, or
/// 409 Conflict while another run holds the slot.
pub async fn start_run(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<StartRunResponse>)> {
    let ticket = state.orchestrator.begin().await?;
    let run_id = ticket.run_id;

    let orchestrator = state.orchestrator.clone();
    let last_error = state.last_error.clone();
    tokio::spawn(async move {
        tracing::info!(run_id, "Background research run started");
        match orchestrator.execute(ticket).await {
            Ok(summary) => {
                tracing::info!(run_id, summary = %summary.display_string(), "Background research run finished");
            }
            Err(e) => {
                tracing::error!(run_id, error = %e, "Background research run failed");
                *last_error.write().await = Some(format!("run {}: {}", run_id, e));
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            run_id,
            status: RunStatus::Running,
        }),
    ))
}

/// GET /runs
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Json<ListRunsResponse>> {
    if query.limit < 1 || query.limit > MAX_RUNS_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be 1-{}, got {}",
            MAX_RUNS_LIMIT, query.limit
        )));
    }

    let runs = db::runs::list_recent(&state.db, query.limit).await?;
    Ok(Json(ListRunsResponse {
        active_run: state.orchestrator.active_run().await,
        runs,
    }))
}

/// GET /runs/:run_id
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> ApiResult<Json<ResearchRun>> {
    db::runs::get_run(&state.db, run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {}", run_id)))
}

/// POST /runs/cancel
///
/// Signals the active run; 404 when nothing is running.
pub async fn cancel_run(State(state): State<AppState>) -> ApiResult<Json<CancelRunResponse>> {
    match state.orchestrator.cancel().await {
        Some(run_id) => Ok(Json(CancelRunResponse {
            run_id,
            cancelling: true,
        })),
        None => Err(ApiError::NotFound("no research run in progress".to_string())),
    }
}

pub fn run_routes() -> Router<AppState> {
    Router::new()
        .route("/runs", post(start_run).get(list_runs))
        .route("/runs/cancel", post(cancel_run))
        .route("/runs/:run_id", get(get_run))
}
