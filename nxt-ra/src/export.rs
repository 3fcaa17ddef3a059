//! Presentation artifacts
//!
//! After each run the persisted state is exported as JSON (and one markdown
//! report) under `<root>/data/` for the dashboard to render:
//!
//! - `velocity_scores.json`
//! - `raid/<project_id>.json`
//! - `portfolio_metrics.json`
//! - `research_log.json` (last 50 runs)
//! - `weekly_summary.md`
//!
//! Every file is written to a temporary sibling and renamed into place, so
//! a reader sees either the previous or the new version, never a partial one.

use crate::db;
use crate::workflow::RunSummary;
use chrono::{DateTime, Utc};
use nxt_common::db::{HealthStatus, Project, RaidItem, VelocityAdjustment, VelocityScore};
use nxt_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

/// Runs kept in `research_log.json`
pub const RESEARCH_LOG_RUNS: i64 = 50;

/// Entries in each of the improver/decline lists
const TOP_MOVERS: usize = 5;

/// Write `bytes` to `path` through a temporary file and rename
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidInput(format!("no parent directory: {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("export");
    let tmp = parent.join(format!(".{}.tmp.{}", file_name, std::process::id()));

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

#[derive(Debug, Serialize)]
struct VelocityExport<'a> {
    generated_at: DateTime<Utc>,
    scores: BTreeMap<&'a str, &'a VelocityScore>,
}

#[derive(Debug, Serialize)]
struct RaidExport<'a> {
    project_id: &'a str,
    project_name: &'a str,
    generated_at: DateTime<Utc>,
    items: &'a [RaidItem],
    adjustments: &'a [VelocityAdjustment],
}

/// Count and share of projects in one health band
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthBand {
    pub count: usize,
    pub percentage: u32,
}

/// Project whose score moved since the previous recomputation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mover {
    pub rank: usize,
    pub project_id: String,
    pub project_name: String,
    pub category: String,
    pub score: f64,
    pub change: f64,
}

/// Portfolio-wide rollup
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioMetrics {
    pub generated_at: DateTime<Utc>,
    pub total_projects: usize,
    pub active_projects: usize,
    pub terminated_projects: usize,
    pub total_investment_billions: f64,
    pub health: BTreeMap<&'static str, HealthBand>,
    pub at_risk_count: usize,
    pub at_risk_percentage: u32,
    /// Mean score of projects that are not terminated
    pub average_velocity: Option<f64>,
    pub top_improvers: Vec<Mover>,
    pub biggest_declines: Vec<Mover>,
}

fn percentage(count: usize, total: usize) -> u32 {
    if total == 0 {
        0
    } else {
        ((count as f64 / total as f64) * 100.0).round() as u32
    }
}

/// Roll the portfolio up from project records and their scores
///
/// A project without a stored score counts as `monitoring` with no movement.
pub fn portfolio_metrics(
    projects: &[Project],
    scores: &[VelocityScore],
    now: DateTime<Utc>,
) -> PortfolioMetrics {
    let by_project: BTreeMap<&str, &VelocityScore> =
        scores.iter().map(|s| (s.project_id.as_str(), s)).collect();

    let mut counts: HashMap<HealthStatus, usize> = HashMap::new();
    let mut velocity_total = 0.0;
    let mut velocity_count = 0usize;
    let mut movers = Vec::new();

    for project in projects {
        let score = by_project.get(project.id.as_str());
        let health = score
            .map(|s| s.health)
            .unwrap_or(HealthStatus::Monitoring);
        *counts.entry(health).or_default() += 1;

        if let Some(s) = score {
            if health != HealthStatus::Terminated {
                velocity_total += s.score;
                velocity_count += 1;
            }
            if let Some(previous) = s.previous_score {
                let change = ((s.score - previous) * 10.0).round() / 10.0;
                if change != 0.0 {
                    movers.push(Mover {
                        rank: 0,
                        project_id: project.id.clone(),
                        project_name: project.name.clone(),
                        category: project.category.clone(),
                        score: s.score,
                        change,
                    });
                }
            }
        }
    }

    let total = projects.len();
    let terminated = counts.get(&HealthStatus::Terminated).copied().unwrap_or(0);
    let at_risk_count: usize = counts
        .iter()
        .filter(|(h, _)| h.is_at_risk())
        .map(|(_, c)| c)
        .sum();

    let health: BTreeMap<&'static str, HealthBand> = HealthStatus::ALL
        .iter()
        .map(|h| {
            let count = counts.get(h).copied().unwrap_or(0);
            (
                h.as_str(),
                HealthBand {
                    count,
                    percentage: percentage(count, total),
                },
            )
        })
        .collect();

    let mut improvers: Vec<Mover> = movers.iter().filter(|m| m.change > 0.0).cloned().collect();
    improvers.sort_by(|a, b| b.change.total_cmp(&a.change));
    let mut declines: Vec<Mover> = movers.into_iter().filter(|m| m.change < 0.0).collect();
    declines.sort_by(|a, b| a.change.total_cmp(&b.change));

    let rank = |list: Vec<Mover>| -> Vec<Mover> {
        list.into_iter()
            .take(TOP_MOVERS)
            .enumerate()
            .map(|(i, m)| Mover { rank: i + 1, ..m })
            .collect()
    };

    PortfolioMetrics {
        generated_at: now,
        total_projects: total,
        active_projects: total - terminated,
        terminated_projects: terminated,
        total_investment_billions: projects.iter().map(|p| p.investment_billions).sum(),
        health,
        at_risk_count,
        at_risk_percentage: percentage(at_risk_count, total),
        average_velocity: (velocity_count > 0)
            .then(|| ((velocity_total / velocity_count as f64) * 10.0).round() / 10.0),
        top_improvers: rank(improvers),
        biggest_declines: rank(declines),
    }
}

/// Write every artifact; returns the files written
pub async fn export_all(pool: &SqlitePool, data_dir: &Path, summary: &RunSummary) -> Result<Vec<PathBuf>> {
    let now = Utc::now();
    let projects = db::projects::list_projects(pool).await?;
    let scores = db::velocity::list_scores(pool).await?;
    let mut written = Vec::new();

    let path = data_dir.join("velocity_scores.json");
    write_json(
        &path,
        &VelocityExport {
            generated_at: now,
            scores: scores.iter().map(|s| (s.project_id.as_str(), s)).collect(),
        },
    )
    .await?;
    written.push(path);

    for project in &projects {
        let items = db::raid_items::list_for_project(pool, &project.id).await?;
        let adjustments = db::velocity::list_adjustments(pool, &project.id).await?;
        let path = data_dir.join("raid").join(format!("{}.json", project.id));
        write_json(
            &path,
            &RaidExport {
                project_id: &project.id,
                project_name: &project.name,
                generated_at: now,
                items: &items,
                adjustments: &adjustments,
            },
        )
        .await?;
        written.push(path);
    }

    let path = data_dir.join("portfolio_metrics.json");
    write_json(&path, &portfolio_metrics(&projects, &scores, now)).await?;
    written.push(path);

    let runs = db::runs::list_recent(pool, RESEARCH_LOG_RUNS).await?;
    let path = data_dir.join("research_log.json");
    write_json(&path, &serde_json::json!({ "generated_at": now, "runs": runs })).await?;
    written.push(path);

    let path = data_dir.join("weekly_summary.md");
    write_atomic(&path, summary.to_markdown().as_bytes()).await?;
    written.push(path);

    info!(files = written.len(), dir = %data_dir.display(), "Exported presentation data");
    Ok(written)
}
