//! nxt-ra: research agent for the NXT infrastructure-project portfolio
//!
//! Discovers new facts about each project, filters them for credibility
//! and novelty, turns what survives into RAID items and velocity metrics,
//! and writes the result atomically per project with an append-only audit
//! trail.

pub mod analysis;
pub mod api;
pub mod collectors;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod types;
pub mod update;
pub mod utils;
pub mod validation;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult, RunError};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use workflow::RunOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub orchestrator: RunOrchestrator,
    pub root_folder: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background run failure, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, orchestrator: RunOrchestrator, root_folder: PathBuf) -> Self {
        Self {
            db,
            orchestrator,
            root_folder,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::run_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
