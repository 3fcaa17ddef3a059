//! Research run orchestration
//!
//! A run walks the whole portfolio with a bounded number of projects in
//! flight (`max_concurrent_projects`). Each project goes through
//! `ProjectPipeline::process`; a failing project is recorded in the summary
//! and never stops the others. Only one run may hold the run slot at a time.
//!
//! Cancellation stops new projects from starting. Projects already in
//! flight finish the validate or apply step they are in and park whatever
//! admitted findings remain.

use super::pipeline::{ProjectPipeline, ProjectReport};
use super::statistics::RunSummary;
use crate::analysis::Analyzer;
use crate::collectors::ParallelCollector;
use crate::config::Settings;
use crate::db;
use crate::error::RunError;
use crate::export;
use crate::update::Updater;
use crate::validation::Validator;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use nxt_common::db::RunStatus;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run slot held by the run in progress
#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: i64,
    cancel: CancellationToken,
}

/// A started run, ready to be executed
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub run_id: i64,
    pub cancel: CancellationToken,
}

#[derive(Clone)]
pub struct RunOrchestrator {
    db: SqlitePool,
    settings: Arc<Settings>,
    pipeline: ProjectPipeline,
    data_dir: PathBuf,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl RunOrchestrator {
    /// Validate `settings` and build every stage from them
    ///
    /// Nothing is written before this succeeds.
    pub fn from_settings(db: SqlitePool, settings: Settings, root_folder: &Path) -> Result<Self, RunError> {
        settings.validate()?;

        let collectors = ParallelCollector::from_settings(&settings, root_folder).map_err(config_error)?;
        let analyzer = Analyzer::from_settings(&settings).map_err(config_error)?;
        let validator = Validator::from_settings(db.clone(), &settings);
        let updater = Updater::new(db.clone(), settings.max_velocity_delta, settings.db_max_lock_wait_ms);

        Ok(Self::with_stages(
            db,
            settings,
            Arc::new(collectors),
            validator,
            analyzer,
            updater,
            nxt_common::config::data_dir(root_folder),
        ))
    }

    /// Assemble an orchestrator from already-built stages
    pub fn with_stages(
        db: SqlitePool,
        settings: Settings,
        collectors: Arc<ParallelCollector>,
        validator: Validator,
        analyzer: Analyzer,
        updater: Updater,
        data_dir: PathBuf,
    ) -> Self {
        let pipeline = ProjectPipeline::new(
            db.clone(),
            collectors,
            validator,
            analyzer,
            updater,
            settings.lookback_days,
            settings.max_findings_per_project,
            settings.db_max_lock_wait_ms,
        );

        Self {
            db,
            settings: Arc::new(settings),
            pipeline,
            data_dir,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Id of the run holding the slot, if any
    pub async fn active_run(&self) -> Option<i64> {
        self.active.lock().await.as_ref().map(|a| a.run_id)
    }

    /// Signal the active run to stop; returns its id
    pub async fn cancel(&self) -> Option<i64> {
        let active = self.active.lock().await;
        active.as_ref().map(|a| {
            info!(run_id = a.run_id, "Cancellation requested");
            a.cancel.cancel();
            a.run_id
        })
    }

    /// Take the run slot and open a run record
    pub async fn begin(&self) -> Result<RunTicket, RunError> {
        self.settings.validate()?;

        let mut active = self.active.lock().await;
        if let Some(running) = active.as_ref() {
            return Err(RunError::AlreadyRunning(running.run_id));
        }

        let run_id = db::runs::start_run(&self.db).await?;
        let cancel = CancellationToken::new();
        *active = Some(ActiveRun {
            run_id,
            cancel: cancel.clone(),
        });

        Ok(RunTicket { run_id, cancel })
    }

    /// Execute a started run to completion, then release the slot
    pub async fn execute(&self, ticket: RunTicket) -> Result<RunSummary, RunError> {
        let run_id = ticket.run_id;
        let result = self.execute_inner(&ticket).await;

        if let Err(e) = &result {
            error!(run_id, error = %e, "Research run failed");
            let detail = serde_json::json!({ "error": e.to_string() });
            if let Err(e) = db::runs::finish_run(&self.db, run_id, RunStatus::Failed, &detail).await {
                warn!(run_id, error = %e, "Could not record run failure");
            }
        }

        *self.active.lock().await = None;
        result
    }

    /// Begin and execute a run in one call
    pub async fn run(&self) -> Result<RunSummary, RunError> {
        let ticket = self.begin().await?;
        self.execute(ticket).await
    }

    async fn execute_inner(&self, ticket: &RunTicket) -> Result<RunSummary, RunError> {
        let run_id = ticket.run_id;
        let started_at = Utc::now();
        let projects = db::projects::list_projects(&self.db).await?;
        let concurrency = self.settings.max_concurrent_projects;

        info!(
            run_id,
            projects = projects.len(),
            concurrency,
            "Research run started"
        );

        let mut summary = RunSummary::new(run_id, started_at, projects.len());

        let results: Vec<(String, Option<nxt_common::Result<ProjectReport>>)> =
            stream::iter(projects.into_iter().map(|p| p.id))
                .map(|project_id| {
                    let pipeline = self.pipeline.clone();
                    let cancel = ticket.cancel.clone();

                    async move {
                        // Projects not yet started when cancelled are skipped
                        if cancel.is_cancelled() {
                            return (project_id, None);
                        }
                        let result = pipeline.process(&project_id, run_id, &cancel).await;
                        (project_id, Some(result))
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        for (project_id, result) in results {
            match result {
                None => {}
                Some(Ok(report)) => {
                    info!(run_id, project_id = %project_id, summary = %report.display_string(), "Project researched");
                    summary.add_project(report);
                }
                Some(Err(e)) => {
                    error!(run_id, project_id = %project_id, error = %e, "Project pipeline failed");
                    summary.add_failure(&project_id, &e);
                }
            }
        }

        let counts = db::audit::outcome_counts(&self.db, run_id).await?;
        summary.set_outcome_counts(&counts);

        let status = if ticket.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        summary.finish(status);

        let summary_json = serde_json::to_value(&summary).map_err(nxt_common::Error::from)?;
        db::runs::finish_run(&self.db, run_id, status, &summary_json).await?;

        info!(run_id, status = status.as_str(), summary = %summary.display_string(), "Research run finished");

        // Exports are derived data; a failed write does not fail the run
        if let Err(e) = export::export_all(&self.db, &self.data_dir, &summary).await {
            warn!(run_id, error = %e, dir = %self.data_dir.display(), "Export failed");
        }

        Ok(summary)
    }
}

fn config_error(e: nxt_common::Error) -> RunError {
    match e {
        nxt_common::Error::Config(msg) => RunError::Configuration(msg),
        other => RunError::Common(other),
    }
}
