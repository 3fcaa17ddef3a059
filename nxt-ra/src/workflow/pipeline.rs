//! Per-project research pipeline
//!
//! One project at a time: replay parked findings, run the collectors to
//! completion, validate the batch, then analyze and apply each admitted
//! finding in order. Validation and update for a project never overlap, so
//! the fingerprint gate and the update transaction see a consistent view.
//!
//! Every decision lands in the audit log here (collection, validation and
//! analysis entries); the update stage writes its own.

use crate::analysis::Analyzer;
use crate::collectors::{CollectorReport, ParallelCollector};
use crate::db;
use crate::db::audit::NewAuditEntry;
use crate::types::{
    CollectRequest, CollectorError, ImpactAssessment, ProjectSnapshot, RawFinding,
    RejectionReason, UpdateError, UpdateOutcome, ValidatedFinding, Verdict,
};
use crate::update::Updater;
use crate::utils::retry_on_lock;
use crate::validation::Validator;
use chrono::{Duration, Utc};
use nxt_common::db::{Outcome, Stage};
use nxt_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to one project during a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project_id: String,
    pub collected: usize,
    pub collector_errors: usize,
    pub admitted: usize,
    pub rejected_low_credibility: usize,
    pub rejected_duplicate: usize,
    pub replayed: usize,
    pub inconclusive: usize,
    pub analysis_errors: usize,
    pub applied: usize,
    pub update_rejected: usize,
    pub conflicts: usize,
    pub deferred: usize,
    pub items_created: Vec<String>,
    pub items_transitioned: Vec<String>,
    pub velocity_before: Option<f64>,
    pub velocity_after: Option<f64>,
    /// Stopped early because the run was cancelled
    pub cancelled: bool,
}

impl ProjectReport {
    fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            ..Self::default()
        }
    }

    /// Net velocity change over the run, if the score moved
    pub fn velocity_change(&self) -> Option<f64> {
        match (self.velocity_before, self.velocity_after) {
            (Some(before), Some(after)) if (after - before).abs() > f64::EPSILON => {
                Some(after - before)
            }
            _ => None,
        }
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}: {} collected, {} admitted, {} items created",
            self.project_id,
            self.collected,
            self.admitted,
            self.items_created.len()
        )
    }
}

/// Whether the pipeline may keep going with the next finding
enum Flow {
    Continue,
    Stop,
}

#[derive(Clone)]
pub struct ProjectPipeline {
    db: SqlitePool,
    collectors: Arc<ParallelCollector>,
    validator: Validator,
    analyzer: Analyzer,
    updater: Updater,
    lookback: Duration,
    max_findings: usize,
    max_lock_wait_ms: u64,
}

impl ProjectPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        collectors: Arc<ParallelCollector>,
        validator: Validator,
        analyzer: Analyzer,
        updater: Updater,
        lookback_days: i64,
        max_findings: usize,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            collectors,
            validator,
            analyzer,
            updater,
            lookback: Duration::days(lookback_days),
            max_findings,
            max_lock_wait_ms,
        }
    }

    async fn audit(&self, entry: NewAuditEntry) -> Result<i64> {
        retry_on_lock("audit::append", self.max_lock_wait_ms, || {
            db::audit::append(&self.db, &entry)
        })
        .await
    }

    async fn snapshot(&self, project_id: &str) -> Result<ProjectSnapshot> {
        let project = db::projects::get_project(&self.db, project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {}", project_id)))?;
        let items = db::raid_items::list_for_project(&self.db, project_id).await?;
        let velocity = db::velocity::get_score(&self.db, project_id).await?;

        Ok(ProjectSnapshot {
            project,
            items,
            velocity,
        })
    }

    /// Run the pipeline for one project
    ///
    /// Source and analysis failures are recorded and absorbed; only database
    /// failures are returned.
    pub async fn process(
        &self,
        project_id: &str,
        run_id: i64,
        cancel: &CancellationToken,
    ) -> Result<ProjectReport> {
        let mut report = ProjectReport::new(project_id);
        let mut snapshot = self.snapshot(project_id).await?;
        report.velocity_before = snapshot
            .velocity
            .as_ref()
            .map(|v| v.score)
            .or(snapshot.project.velocity_score);
        report.velocity_after = report.velocity_before;

        // Findings parked by an earlier run go first
        let parked = db::pending::list_for_project(&self.db, project_id).await?;
        if !parked.is_empty() {
            info!(project_id, run_id, count = parked.len(), "Replaying parked findings");
        }
        for finding in parked {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            report.replayed += 1;
            if let Flow::Stop = self
                .analyze_and_apply(finding, &mut snapshot, run_id, &mut report)
                .await?
            {
                return Ok(report);
            }
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let request = CollectRequest {
            project: snapshot.project.clone(),
            since: Utc::now() - self.lookback,
            max_findings: self.max_findings,
        };
        let collector_reports = self.collectors.collect_all(&request).await;
        let batch = self
            .record_collection(collector_reports, run_id, &mut report)
            .await?;

        // Validation: one finding at a time through the fingerprint gate
        let mut admitted = Vec::new();
        for candidate in self.validator.prepare(batch) {
            let finding = self.validator.admit(candidate, run_id).await?;
            self.record_validation(&finding, run_id, &mut report).await?;
            if finding.is_admitted() {
                admitted.push(finding);
            }
        }

        for (i, finding) in admitted.iter().enumerate() {
            if cancel.is_cancelled() {
                // Admitted fingerprints are already recorded; park the rest
                for rest in &admitted[i..] {
                    db::pending::defer(&self.db, rest, "cancelled", run_id).await?;
                    report.deferred += 1;
                }
                report.cancelled = true;
                info!(project_id, run_id, deferred = admitted.len() - i, "Run cancelled, findings parked");
                return Ok(report);
            }
            if let Flow::Stop = self
                .analyze_and_apply(finding.clone(), &mut snapshot, run_id, &mut report)
                .await?
            {
                for rest in &admitted[i + 1..] {
                    db::pending::defer(&self.db, rest, "project_conflict", run_id).await?;
                    report.deferred += 1;
                }
                return Ok(report);
            }
        }

        debug!(project_id, run_id, summary = %report.display_string(), "Project pipeline finished");
        Ok(report)
    }

    /// One audit entry per collector; returns the findings collected, at
    /// most `max_findings` across all collectors
    async fn record_collection(
        &self,
        reports: Vec<CollectorReport>,
        run_id: i64,
        report: &mut ProjectReport,
    ) -> Result<Vec<RawFinding>> {
        let mut batch = Vec::new();

        for collector_report in reports {
            let entry = match &collector_report.outcome {
                Ok(findings) => NewAuditEntry::new(
                    run_id,
                    Stage::Collection,
                    report.project_id.as_str(),
                    Outcome::Accepted,
                    "collected",
                )
                .detail(json!({
                    "collector": collector_report.collector,
                    "findings": findings.len(),
                    "attempts": collector_report.attempts,
                    "interrupted": collector_report.interrupted.as_ref().map(|e| e.to_string()),
                })),
                Err(e) => {
                    // An empty source is an answer, not a failure
                    let outcome = if *e == CollectorError::SourceEmpty {
                        Outcome::Rejected
                    } else {
                        report.collector_errors += 1;
                        Outcome::Error
                    };
                    NewAuditEntry::new(
                        run_id,
                        Stage::Collection,
                        report.project_id.as_str(),
                        outcome,
                        e.reason(),
                    )
                    .detail(json!({
                        "collector": collector_report.collector,
                        "attempts": collector_report.attempts,
                        "error": e.to_string(),
                    }))
                }
            };
            self.audit(entry).await?;

            if let Ok(findings) = collector_report.outcome {
                batch.extend(findings);
            }
        }

        if batch.len() > self.max_findings {
            let dropped = batch.len() - self.max_findings;
            warn!(
                project_id = %report.project_id,
                run_id,
                cap = self.max_findings,
                dropped,
                "Findings over the per-project cap dropped"
            );
            self.audit(
                NewAuditEntry::new(
                    run_id,
                    Stage::Collection,
                    report.project_id.as_str(),
                    Outcome::Rejected,
                    "findings_cap",
                )
                .detail(json!({ "cap": self.max_findings, "dropped": dropped })),
            )
            .await?;
            batch.truncate(self.max_findings);
        }
        report.collected = batch.len();

        Ok(batch)
    }

    async fn record_validation(
        &self,
        finding: &ValidatedFinding,
        run_id: i64,
        report: &mut ProjectReport,
    ) -> Result<()> {
        let (outcome, reason) = match finding.rejection() {
            None => {
                report.admitted += 1;
                (Outcome::Accepted, "admitted")
            }
            Some(rejection) => {
                match rejection {
                    RejectionReason::LowCredibility => report.rejected_low_credibility += 1,
                    RejectionReason::Duplicate => report.rejected_duplicate += 1,
                }
                (Outcome::Rejected, rejection.as_str())
            }
        };

        let entry = NewAuditEntry::new(
            run_id,
            Stage::Validation,
            report.project_id.as_str(),
            outcome,
            reason,
        )
        .fingerprint(finding.fingerprint.digest.as_str())
        .detail(json!({
            "collector": finding.raw.collector,
            "locator": finding.raw.source.locator,
            "origin": finding.raw.source.origin.as_str(),
            "novel": finding.novel,
            "credibility": finding.credibility,
        }));
        self.audit(entry).await?;
        Ok(())
    }

    /// Analyze one admitted finding and hand the result to the update stage
    async fn analyze_and_apply(
        &self,
        finding: ValidatedFinding,
        snapshot: &mut ProjectSnapshot,
        run_id: i64,
        report: &mut ProjectReport,
    ) -> Result<Flow> {
        let project_id = snapshot.project.id.clone();
        let digest = finding.fingerprint.digest.clone();

        let assessment = match self.analyzer.analyze(&finding, snapshot, run_id).await {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!(project_id = %project_id, run_id, error = %e, "Analysis failed, finding parked");
                report.analysis_errors += 1;
                report.deferred += 1;
                self.audit(
                    NewAuditEntry::new(run_id, Stage::Analysis, project_id.as_str(), Outcome::Error, e.reason())
                        .fingerprint(digest.as_str())
                        .detail(json!({ "error": e.to_string(), "backend": self.analyzer.backend() })),
                )
                .await?;
                db::pending::defer(&self.db, &finding, e.reason(), run_id).await?;
                return Ok(Flow::Continue);
            }
        };

        if let Verdict::Inconclusive { cause } = &assessment.verdict {
            report.inconclusive += 1;
            self.audit(
                NewAuditEntry::new(run_id, Stage::Analysis, project_id.as_str(), Outcome::Rejected, "inconclusive")
                    .fingerprint(digest.as_str())
                    .detail(json!({
                        "cause": cause,
                        "classification": assessment.classification,
                        "confidence": assessment.confidence,
                        "backend": self.analyzer.backend(),
                    })),
            )
            .await?;
            retry_on_lock("pending::resolve", self.max_lock_wait_ms, || {
                db::pending::resolve(&self.db, &project_id, &digest)
            })
            .await?;
            return Ok(Flow::Continue);
        }

        self.audit(
            NewAuditEntry::new(run_id, Stage::Analysis, project_id.as_str(), Outcome::Accepted, "classified")
                .fingerprint(digest.as_str())
                .detail(analysis_detail(&assessment, self.analyzer.backend())),
        )
        .await?;

        match self.updater.apply(&assessment).await {
            Ok(result) => {
                match result.outcome {
                    UpdateOutcome::Applied(changes) => {
                        report.applied += 1;
                        report.velocity_after = Some(changes.velocity.score);
                        report.items_created.extend(changes.created_items);
                        report.items_transitioned.extend(changes.transitioned_items);
                        *snapshot = self.snapshot(&project_id).await?;
                    }
                    UpdateOutcome::Rejected(_) => report.update_rejected += 1,
                }
                Ok(Flow::Continue)
            }
            Err(UpdateError::PersistenceConflict { .. }) => {
                // Retried next run against fresh state
                report.conflicts += 1;
                report.deferred += 1;
                db::pending::defer(&self.db, &finding, "persistence_conflict", run_id).await?;
                Ok(Flow::Stop)
            }
            Err(UpdateError::Common(e)) => Err(e),
        }
    }
}

fn analysis_detail(assessment: &ImpactAssessment, backend: &str) -> serde_json::Value {
    json!({
        "backend": backend,
        "classification": assessment.classification,
        "confidence": assessment.confidence,
        "raid_items": assessment.raid_items.iter().map(|d| d.kind.as_str()).collect::<Vec<_>>(),
        "transitions": assessment.transitions.len(),
        "velocity_delta": assessment.velocity_delta.as_ref().map(|d| d.delta),
        "base_version": assessment.base_version,
    })
}
