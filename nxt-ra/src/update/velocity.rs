//! Velocity score computation
//!
//! A pure function of the project record, its RAID items and the sum of
//! applied adjustments. Recomputed from scratch on every applied assessment.
//!
//! ```text
//! score = baseline(status) + adjustments
//!       - slip penalty      (1 per 30 days late, max 20)
//!       - open-issue penalty (critical 8, high 5, medium 2, low 1; x1.5 after 90 days)
//!       + completed actions (1 each, max 5)
//! risk_adjusted = score - open risks (critical 10, high 6, medium 3, low 1; mitigating halves)
//! ```
//! Both are clamped to 0-100. A cancelled project scores 0.

use chrono::{DateTime, Utc};
use nxt_common::db::{
    HealthStatus, Project, ProjectStatus, RaidItem, RaidKind, RaidStatus, Severity, Trend,
    VelocityScore,
};

const MAX_SLIP_PENALTY: f64 = 20.0;
const SLIP_DAYS_PER_POINT: i64 = 30;
const MAX_COMPLETION_BONUS: f64 = 5.0;
/// Open issues older than this weigh 1.5x
const AGED_ISSUE_DAYS: i64 = 90;
/// Minimum change, either way, that counts as a trend
const TREND_THRESHOLD: f64 = 1.0;

pub fn baseline(status: ProjectStatus) -> f64 {
    match status {
        ProjectStatus::Planning => 55.0,
        ProjectStatus::Construction => 65.0,
        ProjectStatus::Operational => 85.0,
        ProjectStatus::Delayed => 40.0,
        ProjectStatus::Cancelled => 0.0,
    }
}

fn issue_penalty(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 8.0,
        Severity::High => 5.0,
        Severity::Medium => 2.0,
        Severity::Low => 1.0,
    }
}

fn risk_penalty(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 10.0,
        Severity::High => 6.0,
        Severity::Medium => 3.0,
        Severity::Low => 1.0,
    }
}

pub fn slip_penalty(project: &Project) -> f64 {
    ((project.schedule_slip_days() / SLIP_DAYS_PER_POINT) as f64).min(MAX_SLIP_PENALTY)
}

fn open_issue_penalty(items: &[RaidItem], now: DateTime<Utc>) -> f64 {
    items
        .iter()
        .filter(|i| i.kind == RaidKind::Issue && i.status.is_active())
        .map(|i| {
            let penalty = issue_penalty(i.severity);
            if (now - i.created_at).num_days() > AGED_ISSUE_DAYS {
                penalty * 1.5
            } else {
                penalty
            }
        })
        .sum()
}

fn completion_bonus(items: &[RaidItem]) -> f64 {
    let completed = items
        .iter()
        .filter(|i| i.kind == RaidKind::Action && i.status == RaidStatus::Completed)
        .count();
    (completed as f64).min(MAX_COMPLETION_BONUS)
}

fn open_risk_penalty(items: &[RaidItem]) -> f64 {
    items
        .iter()
        .filter(|i| i.kind == RaidKind::Risk)
        .map(|i| match i.status {
            RaidStatus::Open => risk_penalty(i.severity),
            RaidStatus::Mitigating => risk_penalty(i.severity) / 2.0,
            _ => 0.0,
        })
        .sum()
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn trend(previous: Option<f64>, current: f64) -> Trend {
    match previous {
        Some(prev) if current - prev > TREND_THRESHOLD => Trend::Improving,
        Some(prev) if current - prev < -TREND_THRESHOLD => Trend::Declining,
        _ => Trend::Stable,
    }
}

/// Score before rounding and clamping
pub fn raw_score(project: &Project, items: &[RaidItem], adjustments_total: f64, now: DateTime<Utc>) -> f64 {
    if project.status == ProjectStatus::Cancelled {
        return 0.0;
    }
    baseline(project.status) + adjustments_total - slip_penalty(project) - open_issue_penalty(items, now)
        + completion_bonus(items)
}

/// Recompute a project's velocity metrics
pub fn compute(
    project: &Project,
    items: &[RaidItem],
    adjustments_total: f64,
    previous: Option<f64>,
    now: DateTime<Utc>,
) -> VelocityScore {
    let score = round1(raw_score(project, items, adjustments_total, now).clamp(0.0, 100.0));
    let risk_adjusted = round1((score - open_risk_penalty(items)).clamp(0.0, 100.0));

    VelocityScore {
        project_id: project.id.clone(),
        score,
        risk_adjusted,
        trend: trend(previous, score),
        health: HealthStatus::from_score(score, project.status),
        previous_score: previous,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_project;
    use chrono::{Duration, NaiveDate};

    fn item(kind: RaidKind, severity: Severity, status: RaidStatus, age_days: i64) -> RaidItem {
        let created = Utc::now() - Duration::days(age_days);
        RaidItem {
            id: format!("BT015-{}-001", kind.code()),
            project_id: "BT015".to_string(),
            kind,
            severity,
            status,
            description: String::new(),
            mitigation: None,
            owner: None,
            deadline: None,
            fingerprint: "f".to_string(),
            audit_entry_id: 1,
            source_locator: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_baseline_only() {
        let project = sample_project("BT015");
        let v = compute(&project, &[], 0.0, None, Utc::now());
        assert_eq!(v.score, 65.0);
        assert_eq!(v.risk_adjusted, 65.0);
        assert_eq!(v.trend, Trend::Stable);
        assert_eq!(v.health, HealthStatus::OnTrack);
    }

    #[test]
    fn test_slip_penalty_is_capped() {
        let mut project = sample_project("BT015");
        project.original_completion = NaiveDate::from_ymd_opt(2025, 1, 1);
        project.current_completion = NaiveDate::from_ymd_opt(2025, 4, 1);
        assert_eq!(slip_penalty(&project), 3.0);

        project.current_completion = NaiveDate::from_ymd_opt(2030, 1, 1);
        assert_eq!(slip_penalty(&project), 20.0);
    }

    #[test]
    fn test_issues_actions_and_risks() {
        let project = sample_project("BT015");
        let items = vec![
            item(RaidKind::Issue, Severity::High, RaidStatus::Open, 10),
            item(RaidKind::Issue, Severity::Medium, RaidStatus::Investigating, 120),
            item(RaidKind::Issue, Severity::Critical, RaidStatus::Resolved, 10),
            item(RaidKind::Action, Severity::Medium, RaidStatus::Completed, 5),
            item(RaidKind::Risk, Severity::High, RaidStatus::Open, 5),
            item(RaidKind::Risk, Severity::Medium, RaidStatus::Mitigating, 5),
            item(RaidKind::Risk, Severity::Critical, RaidStatus::Closed, 5),
        ];

        let v = compute(&project, &items, -2.0, Some(65.0), Utc::now());

        // 65 - 2 - 5 - 3 (aged medium) + 1
        assert_eq!(v.score, 56.0);
        // 56 - 6 - 1.5
        assert_eq!(v.risk_adjusted, 48.5);
        assert_eq!(v.trend, Trend::Declining);
        assert_eq!(v.previous_score, Some(65.0));
    }

    #[test]
    fn test_score_clamped_and_cancelled_is_terminated() {
        let project = sample_project("BT015");
        assert_eq!(compute(&project, &[], 80.0, None, Utc::now()).score, 100.0);
        assert_eq!(compute(&project, &[], -90.0, None, Utc::now()).score, 0.0);

        let mut cancelled = sample_project("BT015");
        cancelled.status = ProjectStatus::Cancelled;
        let v = compute(&cancelled, &[], 15.0, Some(40.0), Utc::now());
        assert_eq!(v.score, 0.0);
        assert_eq!(v.health, HealthStatus::Terminated);
    }

    #[test]
    fn test_trend_threshold() {
        assert_eq!(trend(Some(60.0), 61.0), Trend::Stable);
        assert_eq!(trend(Some(60.0), 61.5), Trend::Improving);
        assert_eq!(trend(Some(60.0), 58.5), Trend::Declining);
        assert_eq!(trend(None, 10.0), Trend::Stable);
    }
}
