//! Temporary portfolio: database, seeded projects and feed drops

use anyhow::Result;
use chrono::Utc;
use nxt_common::config::{data_dir, database_path, feeds_dir};
use nxt_common::db::ProjectStatus;
use nxt_ra::analysis::{Analyzer, AnalyzerPolicy, HeuristicReasoner};
use nxt_ra::collectors::{CollectorPolicy, FeedDirectoryCollector, ParallelCollector};
use nxt_ra::config::Settings;
use nxt_ra::db::projects::NewProject;
use nxt_ra::types::{ReasoningService, SourceCollector};
use nxt_ra::update::Updater;
use nxt_ra::validation::Validator;
use nxt_ra::workflow::RunOrchestrator;
use nxt_ra::AppState;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Database and feed directory under one temporary root folder
///
/// The `TempDir` must stay alive for the duration of the test.
pub struct TestPortfolio {
    pub dir: TempDir,
    pub pool: SqlitePool,
}

impl TestPortfolio {
    /// Fresh root folder with one construction-stage project per id
    pub async fn seeded(project_ids: &[&str]) -> Result<Self> {
        let dir = TempDir::new()?;
        let pool = nxt_common::db::init_database(&database_path(dir.path())).await?;

        let projects: Vec<NewProject> = project_ids.iter().map(|id| project(id)).collect();
        nxt_ra::update::seed_portfolio(&pool, &projects).await?;

        Ok(Self { dir, pool })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Drop a feed file for a project
    pub fn write_feed(&self, project_id: &str, file_name: &str, entries: Value) -> Result<()> {
        let dir = feeds_dir(self.root()).join(project_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(file_name), serde_json::to_vec_pretty(&entries)?)?;
        Ok(())
    }

    /// Orchestrator reading feed drops and analyzing with the heuristic backend
    pub fn orchestrator(&self) -> RunOrchestrator {
        self.orchestrator_with(Arc::new(HeuristicReasoner))
    }

    /// Orchestrator reading feed drops and analyzing with `reasoner`
    pub fn orchestrator_with(&self, reasoner: Arc<dyn ReasoningService>) -> RunOrchestrator {
        let settings = Settings::default();

        let feeds: Arc<dyn SourceCollector> = Arc::new(FeedDirectoryCollector::new(feeds_dir(self.root())));
        let collectors = ParallelCollector::new(
            vec![feeds],
            CollectorPolicy {
                timeout: Duration::from_secs(5),
                retry_cap: 0,
                backoff_initial: Duration::from_millis(10),
                backoff_max: Duration::from_millis(10),
            },
        );
        let validator = Validator::from_settings(self.pool.clone(), &settings);
        let analyzer = Analyzer::new(reasoner, AnalyzerPolicy::default());
        let updater = Updater::new(
            self.pool.clone(),
            settings.max_velocity_delta,
            settings.db_max_lock_wait_ms,
        );

        RunOrchestrator::with_stages(
            self.pool.clone(),
            settings,
            Arc::new(collectors),
            validator,
            analyzer,
            updater,
            data_dir(self.root()),
        )
    }

    /// Application state around `orchestrator`
    pub fn app_state(&self, orchestrator: RunOrchestrator) -> AppState {
        AppState::new(self.pool.clone(), orchestrator, self.root().to_path_buf())
    }
}

fn project(id: &str) -> NewProject {
    NewProject {
        id: id.to_string(),
        name: format!("Project {}", id),
        category: "battery".to_string(),
        location: "Maricopa County, Arizona".to_string(),
        investment_billions: 5.5,
        status: ProjectStatus::Construction,
        company_ticker: None,
        research_keywords: Vec::new(),
        original_completion: None,
        current_completion: None,
        capacity: None,
        jobs: None,
    }
}

/// Permit notice from a county portal, published now
pub fn permit_entry(url: &str, text: &str) -> Value {
    json!({
        "origin": "permit",
        "publisher": "Maricopa County",
        "url": url,
        "text": text,
        "published": Utc::now().to_rfc3339(),
    })
}
