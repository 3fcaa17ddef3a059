//! Keyword taxonomy reasoner
//!
//! Deterministic, offline classification of finding text into the fixed
//! taxonomy. Used by default and as the reference behaviour for remote
//! backends.

use super::first_sentence;
use crate::types::{
    AnalysisError, ProposedTransition, ReasoningRequest, ReasoningResponse, ReasoningService,
    TaxonomyClass,
};
use nxt_common::db::{RaidKind, RaidStatus, Severity};

const SLIP_TERMS: &[&str] = &[
    "delay", "postpone", "push back", "pushed back", "pushes back", "pause", "halt", "slip",
    "behind schedule", "setback", "suspend",
];

/// Marks a slip as anticipated rather than reported
const FORWARD_LOOKING_TERMS: &[&str] = &[
    "may ", "could", "expected", "expects", "warn", "concern", "might", "potential", "likely",
    "risk of",
];

const FUNDING_TERMS: &[&str] = &[
    "funding", "investment", "invest", "financing", "partnership", "joint venture", "award",
    "grant", "loan", "incentive", "chips act",
];

const REGULATORY_TERMS: &[&str] = &[
    "permit", "filing", "application", "hearing", "procurement", "tender", "bid", "review",
    "zoning", "interconnection",
];

/// A regulatory milestone reported with one of these has been decided
const GRANTED_TERMS: &[&str] = &["approved", "granted", "signed", "issued", "cleared"];

const PROGRESS_TERMS: &[&str] = &[
    "completed", "first production", "began production", "start of production", "topped out",
    "ahead of schedule", "accelerat", "broke ground", "groundbreaking", "commissioned",
    "energized", "came online",
];

const ACCELERATION_TERMS: &[&str] = &["ahead of schedule", "accelerat"];

const CRITICAL_TERMS: &[&str] = &[
    "cancel", "halt", "bankrupt", "lawsuit", "terminated", "abandon",
];

const HIGH_TERMS: &[&str] = &[
    "delay", "shortage", "suspend", "over budget", "cost overrun", "layoff", "postpone",
];

fn found<'a>(text: &str, terms: &'a [&'a str]) -> Vec<&'a str> {
    terms.iter().copied().filter(|t| text.contains(t)).collect()
}

pub struct HeuristicReasoner;

impl HeuristicReasoner {
    fn classify(text: &str) -> Option<(TaxonomyClass, usize, bool)> {
        let scored = [
            (TaxonomyClass::ScheduleSlip, found(text, SLIP_TERMS).len()),
            (TaxonomyClass::RegulatoryMilestone, found(text, REGULATORY_TERMS).len()),
            (TaxonomyClass::FundingPartnership, found(text, FUNDING_TERMS).len()),
            (TaxonomyClass::MilestoneProgress, found(text, PROGRESS_TERMS).len()),
        ];

        let best = scored.iter().map(|(_, n)| *n).max().unwrap_or(0);
        if best == 0 {
            return None;
        }
        let tied = scored.iter().filter(|(_, n)| *n == best).count() > 1;
        // Earlier entries win ties
        scored
            .iter()
            .find(|(_, n)| *n == best)
            .map(|(class, n)| (*class, *n, tied))
    }

    fn severity(text: &str, class: TaxonomyClass, kind: RaidKind) -> Severity {
        if !found(text, CRITICAL_TERMS).is_empty() {
            return Severity::Critical;
        }
        if !found(text, HIGH_TERMS).is_empty() {
            return Severity::High;
        }
        match (class, kind) {
            (TaxonomyClass::ScheduleSlip, _) | (_, RaidKind::Action) => Severity::Medium,
            _ => Severity::Low,
        }
    }

    fn slip_delta(severity: Severity, anticipated: bool) -> f64 {
        let delta = match severity {
            Severity::Critical => -8.0,
            Severity::High => -5.0,
            Severity::Medium => -3.0,
            Severity::Low => -1.0,
        };
        if anticipated {
            delta / 2.0
        } else {
            delta
        }
    }

    /// Actions whose description mentions the approved subject
    fn completed_actions(request: &ReasoningRequest, subjects: &[&str]) -> Vec<ProposedTransition> {
        request
            .active_items
            .iter()
            .filter(|item| item.kind == RaidKind::Action && item.status != RaidStatus::Completed)
            .filter(|item| {
                let description = item.description.to_lowercase();
                subjects.iter().any(|s| description.contains(s))
            })
            .map(|item| ProposedTransition {
                item_id: item.id.clone(),
                to: RaidStatus::Completed,
                note: Some("Completed by reported approval".to_string()),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ReasoningService for HeuristicReasoner {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn assess(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, AnalysisError> {
        let text = request.finding_text.to_lowercase();

        let Some((class, hits, tied)) = Self::classify(&text) else {
            return Ok(ReasoningResponse::default());
        };

        let mut confidence = (0.4 + 0.2 * hits as f64).min(0.95);
        if tied {
            confidence -= 0.15;
        }

        let mut response = ReasoningResponse {
            classification: Some(class),
            confidence,
            description: first_sentence(&request.finding_text),
            ..ReasoningResponse::default()
        };

        let kind = match class {
            TaxonomyClass::ScheduleSlip => {
                let anticipated = !found(&text, FORWARD_LOOKING_TERMS).is_empty();
                let kind = if anticipated { RaidKind::Risk } else { RaidKind::Issue };
                let severity = Self::severity(&text, class, kind);
                response.velocity_delta = Some(Self::slip_delta(severity, anticipated));
                response.justification = Some(format!(
                    "{} schedule slip reported",
                    if anticipated { "Anticipated" } else { "Confirmed" }
                ));
                kind
            }
            TaxonomyClass::RegulatoryMilestone => {
                if found(&text, GRANTED_TERMS).is_empty() {
                    RaidKind::Action
                } else {
                    let subjects = found(&text, REGULATORY_TERMS);
                    response.transitions = Self::completed_actions(request, &subjects);
                    RaidKind::Decision
                }
            }
            TaxonomyClass::FundingPartnership => RaidKind::Decision,
            TaxonomyClass::MilestoneProgress => {
                let accelerated = !found(&text, ACCELERATION_TERMS).is_empty();
                response.velocity_delta = Some(if accelerated { 5.0 } else { 3.0 });
                response.justification = Some(if accelerated {
                    "Schedule acceleration reported".to_string()
                } else {
                    "Milestone completion reported".to_string()
                });
                RaidKind::Decision
            }
        };

        response.raid_kind = Some(kind);
        response.severity = Some(Self::severity(&text, class, kind));
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemSummary;

    fn request(text: &str) -> ReasoningRequest {
        ReasoningRequest {
            project_id: "BT015".to_string(),
            finding_text: text.to_string(),
            published_at: None,
            project_summary: String::new(),
            taxonomy: TaxonomyClass::ALL.to_vec(),
            active_items: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_permit_approval_is_decision_without_delta() {
        let response = HeuristicReasoner
            .assess(&request("The county approved the construction permit in Feb 2024."))
            .await
            .unwrap();

        assert_eq!(response.classification, Some(TaxonomyClass::RegulatoryMilestone));
        assert_eq!(response.raid_kind, Some(RaidKind::Decision));
        assert!(response.confidence >= 0.5);
        assert_eq!(response.velocity_delta, None);
    }

    #[tokio::test]
    async fn test_pending_permit_is_action() {
        let response = HeuristicReasoner
            .assess(&request("Company submitted its air permit application to the state."))
            .await
            .unwrap();
        assert_eq!(response.raid_kind, Some(RaidKind::Action));
        assert_eq!(response.severity, Some(Severity::Medium));
    }

    #[tokio::test]
    async fn test_reported_slip_is_issue_with_negative_delta() {
        let response = HeuristicReasoner
            .assess(&request("Intel has delayed the Ohio fab opening to 2030."))
            .await
            .unwrap();

        assert_eq!(response.classification, Some(TaxonomyClass::ScheduleSlip));
        assert_eq!(response.raid_kind, Some(RaidKind::Issue));
        assert_eq!(response.severity, Some(Severity::High));
        assert_eq!(response.velocity_delta, Some(-5.0));
    }

    #[tokio::test]
    async fn test_anticipated_slip_is_risk() {
        let response = HeuristicReasoner
            .assess(&request("Analysts warn the project could face a delay from transformer shortages."))
            .await
            .unwrap();

        assert_eq!(response.raid_kind, Some(RaidKind::Risk));
        assert_eq!(response.velocity_delta, Some(-2.5));
    }

    #[tokio::test]
    async fn test_funding_news_is_decision() {
        let response = HeuristicReasoner
            .assess(&request("The plant secured a $1.5 billion DOE loan and a state incentive package."))
            .await
            .unwrap();
        assert_eq!(response.classification, Some(TaxonomyClass::FundingPartnership));
        assert_eq!(response.raid_kind, Some(RaidKind::Decision));
        assert_eq!(response.velocity_delta, None);
    }

    #[tokio::test]
    async fn test_unrelated_text_is_unclassified() {
        let response = HeuristicReasoner
            .assess(&request("The company hosted a community picnic."))
            .await
            .unwrap();
        assert_eq!(response.classification, None);
        assert_eq!(response.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_approval_completes_matching_action() {
        let mut req = request("State regulators approved the air permit for the fab.");
        req.active_items = vec![
            ItemSummary {
                id: "SC001-A-001".to_string(),
                kind: RaidKind::Action,
                severity: Severity::Medium,
                status: RaidStatus::Pending,
                description: "Obtain state air permit".to_string(),
            },
            ItemSummary {
                id: "SC001-A-002".to_string(),
                kind: RaidKind::Action,
                severity: Severity::Medium,
                status: RaidStatus::Pending,
                description: "Hire construction workforce".to_string(),
            },
        ];

        let response = HeuristicReasoner.assess(&req).await.unwrap();

        assert_eq!(response.transitions.len(), 1);
        assert_eq!(response.transitions[0].item_id, "SC001-A-001");
        assert_eq!(response.transitions[0].to, RaidStatus::Completed);
    }
}
