//! Database models
//!
//! Enums are stored as their snake_case text form; `parse` is the inverse of
//! `as_str` and rejects unknown values with `Error::InvalidInput`.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

fn unknown(kind: &str, value: &str) -> Error {
    Error::InvalidInput(format!("unknown {}: {}", kind, value))
}

/// Lifecycle status of a portfolio project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    Construction,
    Operational,
    Delayed,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "planning",
            ProjectStatus::Construction => "construction",
            ProjectStatus::Operational => "operational",
            ProjectStatus::Delayed => "delayed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "planning" => Ok(ProjectStatus::Planning),
            "construction" => Ok(ProjectStatus::Construction),
            "operational" => Ok(ProjectStatus::Operational),
            "delayed" => Ok(ProjectStatus::Delayed),
            "cancelled" => Ok(ProjectStatus::Cancelled),
            other => Err(unknown("project status", other)),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Portfolio project record
///
/// Created manually (or through the seed import); mutated only by the update
/// stage, which bumps `version` on every committed assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Category + sequence code, e.g. `BT015`
    pub id: String,
    pub name: String,
    pub category: String,
    pub location: String,
    /// Announced investment in billions of USD
    pub investment_billions: f64,
    pub status: ProjectStatus,
    pub company_ticker: Option<String>,
    /// Search terms for news collectors; the project name is used when empty
    pub research_keywords: Vec<String>,
    pub original_completion: Option<NaiveDate>,
    pub current_completion: Option<NaiveDate>,
    pub capacity: Option<String>,
    pub jobs: Option<i64>,
    pub velocity_score: Option<f64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Days the current completion date has slipped past the original one
    pub fn schedule_slip_days(&self) -> i64 {
        match (self.original_completion, self.current_completion) {
            (Some(original), Some(current)) => (current - original).num_days().max(0),
            _ => 0,
        }
    }
}

/// RAID item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaidKind {
    Risk,
    Action,
    Issue,
    Decision,
}

impl RaidKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaidKind::Risk => "risk",
            RaidKind::Action => "action",
            RaidKind::Issue => "issue",
            RaidKind::Decision => "decision",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "risk" => Ok(RaidKind::Risk),
            "action" => Ok(RaidKind::Action),
            "issue" => Ok(RaidKind::Issue),
            "decision" => Ok(RaidKind::Decision),
            other => Err(unknown("RAID kind", other)),
        }
    }

    /// Single-letter code used in item ids (`BT015-D-001`)
    pub fn code(&self) -> char {
        match self {
            RaidKind::Risk => 'R',
            RaidKind::Action => 'A',
            RaidKind::Issue => 'I',
            RaidKind::Decision => 'D',
        }
    }

    /// Status assigned to a newly created item
    pub fn initial_status(&self) -> RaidStatus {
        self.lifecycle()[0]
    }

    /// Forward-only lifecycle, in order
    pub fn lifecycle(&self) -> &'static [RaidStatus] {
        match self {
            RaidKind::Risk => &[RaidStatus::Open, RaidStatus::Mitigating, RaidStatus::Closed],
            RaidKind::Action => &[
                RaidStatus::Pending,
                RaidStatus::InProgress,
                RaidStatus::Completed,
            ],
            RaidKind::Issue => &[
                RaidStatus::Open,
                RaidStatus::Investigating,
                RaidStatus::Resolved,
            ],
            RaidKind::Decision => &[RaidStatus::Recorded, RaidStatus::Superseded],
        }
    }

    fn rank(&self, status: RaidStatus) -> Option<usize> {
        self.lifecycle().iter().position(|s| *s == status)
    }

    /// Check a proposed status change against the lifecycle
    pub fn check_transition(&self, from: RaidStatus, to: RaidStatus) -> TransitionCheck {
        match (self.rank(from), self.rank(to)) {
            (Some(a), Some(b)) if a == b => TransitionCheck::NoChange,
            (Some(a), Some(b)) if b > a => TransitionCheck::Forward,
            _ => TransitionCheck::Invalid,
        }
    }
}

impl fmt::Display for RaidKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking a status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    Forward,
    NoChange,
    /// Backward, or a status that does not belong to the item's kind
    Invalid,
}

/// RAID item status across all kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaidStatus {
    Open,
    Mitigating,
    Closed,
    Pending,
    InProgress,
    Completed,
    Investigating,
    Resolved,
    Recorded,
    Superseded,
}

impl RaidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaidStatus::Open => "open",
            RaidStatus::Mitigating => "mitigating",
            RaidStatus::Closed => "closed",
            RaidStatus::Pending => "pending",
            RaidStatus::InProgress => "in_progress",
            RaidStatus::Completed => "completed",
            RaidStatus::Investigating => "investigating",
            RaidStatus::Resolved => "resolved",
            RaidStatus::Recorded => "recorded",
            RaidStatus::Superseded => "superseded",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "open" => Ok(RaidStatus::Open),
            "mitigating" => Ok(RaidStatus::Mitigating),
            "closed" => Ok(RaidStatus::Closed),
            "pending" => Ok(RaidStatus::Pending),
            "in_progress" | "in-progress" => Ok(RaidStatus::InProgress),
            "completed" => Ok(RaidStatus::Completed),
            "investigating" => Ok(RaidStatus::Investigating),
            "resolved" => Ok(RaidStatus::Resolved),
            "recorded" => Ok(RaidStatus::Recorded),
            "superseded" => Ok(RaidStatus::Superseded),
            other => Err(unknown("RAID status", other)),
        }
    }

    /// Statuses that still count against a project's health
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RaidStatus::Open
                | RaidStatus::Mitigating
                | RaidStatus::Pending
                | RaidStatus::InProgress
                | RaidStatus::Investigating
        )
    }
}

impl fmt::Display for RaidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity (risks, issues) or priority (actions, decisions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(unknown("severity", other)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted RAID item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaidItem {
    /// `<project_id>-<K>-<NNN>`
    pub id: String,
    pub project_id: String,
    pub kind: RaidKind,
    pub severity: Severity,
    pub status: RaidStatus,
    pub description: String,
    pub mitigation: Option<String>,
    pub owner: Option<String>,
    pub deadline: Option<NaiveDate>,
    /// Fingerprint digest of the finding that created the item
    pub fingerprint: String,
    /// Update-stage audit entry that created the item
    pub audit_entry_id: i64,
    pub source_locator: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Velocity trend versus the previous recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Improving => "improving",
            Trend::Stable => "stable",
            Trend::Declining => "declining",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "improving" => Ok(Trend::Improving),
            "stable" => Ok(Trend::Stable),
            "declining" => Ok(Trend::Declining),
            other => Err(unknown("trend", other)),
        }
    }
}

/// Health band derived from a velocity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Executing,
    OnTrack,
    Monitoring,
    Distressed,
    Critical,
    Terminated,
}

impl HealthStatus {
    pub const ALL: [HealthStatus; 6] = [
        HealthStatus::Executing,
        HealthStatus::OnTrack,
        HealthStatus::Monitoring,
        HealthStatus::Distressed,
        HealthStatus::Critical,
        HealthStatus::Terminated,
    ];

    pub fn from_score(score: f64, status: ProjectStatus) -> Self {
        if status == ProjectStatus::Cancelled || score <= 0.0 {
            HealthStatus::Terminated
        } else if score >= 80.0 {
            HealthStatus::Executing
        } else if score >= 65.0 {
            HealthStatus::OnTrack
        } else if score >= 50.0 {
            HealthStatus::Monitoring
        } else if score >= 35.0 {
            HealthStatus::Distressed
        } else {
            HealthStatus::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Executing => "executing",
            HealthStatus::OnTrack => "on_track",
            HealthStatus::Monitoring => "monitoring",
            HealthStatus::Distressed => "distressed",
            HealthStatus::Critical => "critical",
            HealthStatus::Terminated => "terminated",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        HealthStatus::ALL
            .into_iter()
            .find(|h| h.as_str() == value)
            .ok_or_else(|| unknown("health status", value))
    }

    /// Distressed, critical or terminated
    pub fn is_at_risk(&self) -> bool {
        matches!(
            self,
            HealthStatus::Distressed | HealthStatus::Critical | HealthStatus::Terminated
        )
    }
}

/// Derived velocity metrics for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityScore {
    pub project_id: String,
    pub score: f64,
    pub risk_adjusted: f64,
    pub trend: Trend,
    pub health: HealthStatus,
    pub previous_score: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Applied (already clamped) velocity adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityAdjustment {
    pub id: i64,
    pub project_id: String,
    pub run_id: i64,
    pub delta: f64,
    pub justification: String,
    pub related_items: Vec<String>,
    pub fingerprint: String,
    pub audit_entry_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Pipeline stage recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collection,
    Validation,
    Analysis,
    Update,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Collection => "collection",
            Stage::Validation => "validation",
            Stage::Analysis => "analysis",
            Stage::Update => "update",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "collection" => Ok(Stage::Collection),
            "validation" => Ok(Stage::Validation),
            "analysis" => Ok(Stage::Analysis),
            "update" => Ok(Stage::Update),
            other => Err(unknown("stage", other)),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Accepted,
    Rejected,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Accepted => "accepted",
            Outcome::Rejected => "rejected",
            Outcome::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "accepted" => Ok(Outcome::Accepted),
            "rejected" => Ok(Outcome::Rejected),
            "error" => Ok(Outcome::Error),
            other => Err(unknown("outcome", other)),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit log row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub run_id: i64,
    pub stage: Stage,
    pub project_id: String,
    pub outcome: Outcome,
    pub reason: String,
    pub detail: Option<serde_json::Value>,
    pub fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Research run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "cancelled" => Ok(RunStatus::Cancelled),
            "failed" => Ok(RunStatus::Failed),
            other => Err(unknown("run status", other)),
        }
    }
}

/// One pipeline run; `run_id` increases monotonically
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRun {
    pub run_id: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_lifecycle_is_forward_only() {
        let kind = RaidKind::Action;
        assert_eq!(
            kind.check_transition(RaidStatus::Pending, RaidStatus::InProgress),
            TransitionCheck::Forward
        );
        assert_eq!(
            kind.check_transition(RaidStatus::Pending, RaidStatus::Completed),
            TransitionCheck::Forward
        );
        assert_eq!(
            kind.check_transition(RaidStatus::Completed, RaidStatus::Pending),
            TransitionCheck::Invalid
        );
        assert_eq!(
            kind.check_transition(RaidStatus::InProgress, RaidStatus::InProgress),
            TransitionCheck::NoChange
        );
    }

    #[test]
    fn test_cross_kind_status_is_invalid() {
        assert_eq!(
            RaidKind::Issue.check_transition(RaidStatus::Open, RaidStatus::Completed),
            TransitionCheck::Invalid
        );
        assert_eq!(
            RaidKind::Decision.check_transition(RaidStatus::Recorded, RaidStatus::Closed),
            TransitionCheck::Invalid
        );
    }

    #[test]
    fn test_health_bands() {
        let s = ProjectStatus::Construction;
        assert_eq!(HealthStatus::from_score(85.0, s), HealthStatus::Executing);
        assert_eq!(HealthStatus::from_score(80.0, s), HealthStatus::Executing);
        assert_eq!(HealthStatus::from_score(79.9, s), HealthStatus::OnTrack);
        assert_eq!(HealthStatus::from_score(50.0, s), HealthStatus::Monitoring);
        assert_eq!(HealthStatus::from_score(35.0, s), HealthStatus::Distressed);
        assert_eq!(HealthStatus::from_score(10.0, s), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(0.0, s), HealthStatus::Terminated);
        assert_eq!(
            HealthStatus::from_score(90.0, ProjectStatus::Cancelled),
            HealthStatus::Terminated
        );
    }

    #[test]
    fn test_status_text_accepts_hyphenated_in_progress() {
        assert_eq!(RaidStatus::parse("in-progress").unwrap(), RaidStatus::InProgress);
        assert_eq!(RaidStatus::InProgress.as_str(), "in_progress");
        assert!(RaidStatus::parse("done").is_err());
    }
}
