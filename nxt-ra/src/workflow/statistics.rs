//! Run-level statistics and the weekly research summary
//!
//! Outcome counts come from the audit log rather than from in-memory
//! counters, so a summary always agrees with what was recorded, including
//! entries written by projects that later failed.

use super::pipeline::ProjectReport;
use crate::db::audit::OutcomeCount;
use chrono::{DateTime, Utc};
use nxt_common::db::RunStatus;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Counts for one stage, keyed by outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageStats {
    pub accepted: i64,
    pub rejected: i64,
    pub error: i64,
    /// `(reason, count)` for rejections and errors
    pub reasons: Vec<(String, i64)>,
}

impl StageStats {
    fn add(&mut self, count: &OutcomeCount) {
        match count.outcome.as_str() {
            "accepted" => self.accepted += count.count,
            "rejected" => self.rejected += count.count,
            _ => self.error += count.count,
        }
        if count.outcome != "accepted" {
            self.reasons.push((count.reason.clone(), count.count));
        }
    }

    pub fn reason_count(&self, reason: &str) -> i64 {
        self.reasons
            .iter()
            .filter(|(r, _)| r == reason)
            .map(|(_, c)| c)
            .sum()
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} accepted, {} rejected, {} errors",
            self.accepted, self.rejected, self.error
        )
    }
}

/// Velocity change of one project over a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityChange {
    pub project_id: String,
    pub before: f64,
    pub after: f64,
}

impl VelocityChange {
    pub fn delta(&self) -> f64 {
        self.after - self.before
    }
}

/// Project whose pipeline failed outright
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFailure {
    pub project_id: String,
    pub error: String,
}

/// Summary of one research run, stored with the run and exported
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub projects_total: usize,
    pub projects_processed: usize,
    pub collection: StageStats,
    pub validation: StageStats,
    pub analysis: StageStats,
    pub update: StageStats,
    pub findings_collected: usize,
    pub findings_admitted: usize,
    pub items_created: Vec<String>,
    pub items_transitioned: Vec<String>,
    pub deferred: usize,
    pub velocity_changes: Vec<VelocityChange>,
    pub failures: Vec<ProjectFailure>,
}

impl RunSummary {
    pub fn new(run_id: i64, started_at: DateTime<Utc>, projects_total: usize) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            started_at,
            finished_at: started_at,
            projects_total,
            projects_processed: 0,
            collection: StageStats::default(),
            validation: StageStats::default(),
            analysis: StageStats::default(),
            update: StageStats::default(),
            findings_collected: 0,
            findings_admitted: 0,
            items_created: Vec::new(),
            items_transitioned: Vec::new(),
            deferred: 0,
            velocity_changes: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Fold in one project's report
    pub fn add_project(&mut self, report: ProjectReport) {
        self.projects_processed += 1;
        self.findings_collected += report.collected;
        self.findings_admitted += report.admitted;
        self.deferred += report.deferred;
        if let (Some(_), Some(before), Some(after)) = (
            report.velocity_change(),
            report.velocity_before,
            report.velocity_after,
        ) {
            self.velocity_changes.push(VelocityChange {
                project_id: report.project_id.clone(),
                before,
                after,
            });
        }
        self.items_created.extend(report.items_created);
        self.items_transitioned.extend(report.items_transitioned);
    }

    pub fn add_failure(&mut self, project_id: &str, error: impl ToString) {
        self.failures.push(ProjectFailure {
            project_id: project_id.to_string(),
            error: error.to_string(),
        });
    }

    /// Replace stage counts with the audit log's view of the run
    pub fn set_outcome_counts(&mut self, counts: &[OutcomeCount]) {
        self.collection = StageStats::default();
        self.validation = StageStats::default();
        self.analysis = StageStats::default();
        self.update = StageStats::default();

        for count in counts {
            let stage = match count.stage.as_str() {
                "collection" => &mut self.collection,
                "validation" => &mut self.validation,
                "analysis" => &mut self.analysis,
                _ => &mut self.update,
            };
            stage.add(count);
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Utc::now();
    }

    pub fn improved(&self) -> impl Iterator<Item = &VelocityChange> {
        self.velocity_changes.iter().filter(|c| c.delta() > 0.0)
    }

    pub fn declined(&self) -> impl Iterator<Item = &VelocityChange> {
        self.velocity_changes.iter().filter(|c| c.delta() < 0.0)
    }

    pub fn display_string(&self) -> String {
        format!(
            "Run {} {}: {} projects, {} findings admitted, {} RAID items created, {} errors",
            self.run_id,
            self.status.as_str(),
            self.projects_processed,
            self.findings_admitted,
            self.items_created.len(),
            self.collection.error + self.analysis.error + self.update.error + self.failures.len() as i64
        )
    }

    /// Weekly research summary as markdown
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Weekly Research Summary");
        let _ = writeln!(md);
        let _ = writeln!(
            md,
            "Run {} ({}) finished {}",
            self.run_id,
            self.status.as_str(),
            self.finished_at.format("%Y-%m-%d %H:%M UTC")
        );
        let _ = writeln!(md);

        let _ = writeln!(md, "## Research Activity");
        let _ = writeln!(md);
        let _ = writeln!(md, "- Projects researched: {} of {}", self.projects_processed, self.projects_total);
        let _ = writeln!(md, "- Findings collected: {}", self.findings_collected);
        let _ = writeln!(md, "- Findings admitted: {}", self.findings_admitted);
        let _ = writeln!(md, "- RAID items created: {}", self.items_created.len());
        let _ = writeln!(md, "- RAID items transitioned: {}", self.items_transitioned.len());
        if self.deferred > 0 {
            let _ = writeln!(md, "- Findings deferred to next run: {}", self.deferred);
        }
        let _ = writeln!(md);

        let _ = writeln!(md, "## Velocity Changes");
        let _ = writeln!(md);
        if self.velocity_changes.is_empty() {
            let _ = writeln!(md, "No velocity changes this run.");
        } else {
            for change in self.improved().chain(self.declined()) {
                let _ = writeln!(
                    md,
                    "- {}: {:.1} -> {:.1} ({:+.1})",
                    change.project_id,
                    change.before,
                    change.after,
                    change.delta()
                );
            }
        }
        let _ = writeln!(md);

        let _ = writeln!(md, "## Rejections");
        let _ = writeln!(md);
        let _ = writeln!(md, "| Stage | Reason | Count |");
        let _ = writeln!(md, "|---|---|---|");
        for (stage, stats) in [
            ("collection", &self.collection),
            ("validation", &self.validation),
            ("analysis", &self.analysis),
            ("update", &self.update),
        ] {
            for (reason, count) in &stats.reasons {
                let _ = writeln!(md, "| {} | {} | {} |", stage, reason, count);
            }
        }
        let _ = writeln!(md);

        if !self.failures.is_empty() {
            let _ = writeln!(md, "## Errors");
            let _ = writeln!(md);
            for failure in &self.failures {
                let _ = writeln!(md, "- {}: {}", failure.project_id, failure.error);
            }
        }

        md
    }
}
