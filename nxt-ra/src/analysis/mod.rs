//! Analysis stage
//!
//! Turns an admitted finding into an `ImpactAssessment` against the project
//! state read at analysis time. The reasoning backend only proposes; this
//! module enforces the taxonomy, the confidence threshold, the risk-posture
//! rule for `critical`, and the velocity delta bound.

pub mod anthropic;
pub mod heuristic;

pub use anthropic::AnthropicReasoner;
pub use heuristic::HeuristicReasoner;

use crate::config::{ReasoningBackend, Settings};
use crate::types::{
    AnalysisError, ImpactAssessment, ItemRef, ItemSummary, ProjectSnapshot, RaidDraft,
    ReasoningRequest, ReasoningResponse, ReasoningService, TaxonomyClass, ValidatedFinding,
    Verdict, VelocityDelta,
};
use nxt_common::db::{RaidKind, Severity};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Terms that justify a new `critical` item on a project already carrying
/// open high-severity items
const TERMINAL_TERMS: &[&str] = &["cancel", "bankrupt", "terminated"];

/// First sentence of `text`, at most 240 characters
pub(crate) fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|(i, c)| {
            matches!(c, '.' | '!' | '?')
                && trimmed[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace)
        })
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(trimmed.len());
    trimmed[..end].chars().take(240).collect()
}

/// Bounds applied to every reasoning answer
#[derive(Debug, Clone, Copy)]
pub struct AnalyzerPolicy {
    /// Per reasoning call
    pub timeout: Duration,
    pub min_confidence: f64,
    /// Largest velocity change one assessment may propose
    pub max_delta: f64,
}

impl AnalyzerPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.analysis_timeout(),
            min_confidence: settings.min_classification_confidence,
            max_delta: settings.max_velocity_delta,
        }
    }
}

impl Default for AnalyzerPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            min_confidence: 0.5,
            max_delta: 10.0,
        }
    }
}

#[derive(Clone)]
pub struct Analyzer {
    reasoner: Arc<dyn ReasoningService>,
    policy: AnalyzerPolicy,
}

impl Analyzer {
    pub fn new(reasoner: Arc<dyn ReasoningService>, policy: AnalyzerPolicy) -> Self {
        Self { reasoner, policy }
    }

    /// Analyzer using the backend selected in `settings`
    pub fn from_settings(settings: &Settings) -> nxt_common::Result<Self> {
        let reasoner: Arc<dyn ReasoningService> = match settings.reasoning_backend {
            ReasoningBackend::Heuristic => Arc::new(HeuristicReasoner),
            ReasoningBackend::Anthropic => {
                let key = settings
                    .anthropic_api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| {
                        nxt_common::Error::Config("anthropic_api_key is not set".to_string())
                    })?;
                Arc::new(AnthropicReasoner::new(
                    key,
                    settings.anthropic_model.clone(),
                    settings.analysis_timeout(),
                )?)
            }
        };
        Ok(Self::new(reasoner, AnalyzerPolicy::from_settings(settings)))
    }

    pub fn backend(&self) -> &'static str {
        self.reasoner.name()
    }

    /// Assess one admitted finding
    ///
    /// A malformed answer (after one retry) becomes an inconclusive
    /// assessment with cause `analysis_malformed`. Only a timeout that
    /// survives the retry is returned as an error.
    pub async fn analyze(
        &self,
        finding: &ValidatedFinding,
        snapshot: &ProjectSnapshot,
        run_id: i64,
    ) -> Result<ImpactAssessment, AnalysisError> {
        let request = ReasoningRequest {
            project_id: snapshot.project.id.clone(),
            finding_text: finding.raw.full_text(),
            published_at: finding.raw.published_at,
            project_summary: snapshot.summary(),
            taxonomy: TaxonomyClass::ALL.to_vec(),
            active_items: snapshot.active_items().map(ItemSummary::from).collect(),
        };

        let mut assessment = ImpactAssessment {
            project_id: snapshot.project.id.clone(),
            run_id,
            base_version: snapshot.project.version,
            fingerprint: finding.fingerprint.digest.clone(),
            source_locator: Some(finding.raw.source.locator.clone()),
            classification: None,
            confidence: 0.0,
            verdict: Verdict::Structured,
            raid_items: Vec::new(),
            transitions: Vec::new(),
            velocity_delta: None,
        };

        let response = match self.call_with_retry(&request).await {
            Ok(response) => response,
            Err(e @ AnalysisError::Malformed(_)) => {
                assessment.verdict = Verdict::Inconclusive {
                    cause: e.reason().to_string(),
                };
                return Ok(assessment);
            }
            Err(e) => return Err(e),
        };

        assessment.classification = response.classification;
        assessment.confidence = response.confidence;

        let Some(class) = response.classification else {
            assessment.verdict = inconclusive("unclassified");
            return Ok(assessment);
        };
        if !(response.confidence >= self.policy.min_confidence) {
            debug!(
                project_id = %request.project_id,
                confidence = response.confidence,
                threshold = self.policy.min_confidence,
                "Classification below confidence threshold"
            );
            assessment.verdict = inconclusive("low_confidence");
            return Ok(assessment);
        }

        let allowed = class.allowed_kinds();
        let kind = response.raid_kind.unwrap_or(allowed[0]);
        if !allowed.contains(&kind) {
            warn!(
                project_id = %request.project_id,
                class = class.as_str(),
                kind = kind.as_str(),
                "Reasoning answer outside taxonomy"
            );
            assessment.verdict = inconclusive("taxonomy_mismatch");
            return Ok(assessment);
        }

        let severity = apply_posture(
            response.severity.unwrap_or(Severity::Medium),
            snapshot,
            &request.finding_text,
        );
        let description = if response.description.trim().is_empty() {
            first_sentence(&request.finding_text)
        } else {
            response.description.trim().to_string()
        };

        assessment.velocity_delta = self.bounded_delta(class, &response, &description);
        assessment.transitions = response.transitions;
        assessment.raid_items.push(RaidDraft {
            kind,
            severity,
            description,
            mitigation: response.mitigation,
            owner: response.owner,
            deadline: response.deadline,
        });

        Ok(assessment)
    }

    async fn call_with_retry(
        &self,
        request: &ReasoningRequest,
    ) -> Result<ReasoningResponse, AnalysisError> {
        match self.call_once(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(
                    project_id = %request.project_id,
                    backend = self.reasoner.name(),
                    error = %e,
                    "Reasoning call failed, retrying once"
                );
                self.call_once(request).await
            }
        }
    }

    async fn call_once(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, AnalysisError> {
        match tokio::time::timeout(self.policy.timeout, self.reasoner.assess(request)).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout(format!(
                "no answer within {}s",
                self.policy.timeout.as_secs_f64()
            ))),
        }
    }

    /// Delta for schedule-bearing classes only, clamped to the policy bound
    fn bounded_delta(
        &self,
        class: TaxonomyClass,
        response: &ReasoningResponse,
        description: &str,
    ) -> Option<VelocityDelta> {
        if !class.bears_on_schedule() {
            return None;
        }
        let proposed = response.velocity_delta.filter(|d| d.is_finite() && *d != 0.0)?;
        let delta = proposed.clamp(-self.policy.max_delta, self.policy.max_delta);

        let mut related_items: Vec<ItemRef> = response
            .related_items
            .iter()
            .map(|id| ItemRef::Existing(id.clone()))
            .collect();
        related_items.push(ItemRef::Draft(0));

        Some(VelocityDelta {
            delta,
            justification: response
                .justification
                .clone()
                .unwrap_or_else(|| format!("{}: {}", class.as_str(), description)),
            related_items,
        })
    }
}

fn inconclusive(cause: &str) -> Verdict {
    Verdict::Inconclusive {
        cause: cause.to_string(),
    }
}

/// Downgrade `critical` to `high` while the project already carries open
/// high-severity risks or issues, unless the finding reports a terminal event
fn apply_posture(severity: Severity, snapshot: &ProjectSnapshot, text: &str) -> Severity {
    if severity != Severity::Critical {
        return severity;
    }
    let strained = snapshot.active_items().any(|item| {
        matches!(item.kind, RaidKind::Risk | RaidKind::Issue) && item.severity >= Severity::High
    });
    if !strained {
        return severity;
    }
    let lower = text.to_lowercase();
    if TERMINAL_TERMS.iter().any(|t| lower.contains(t)) {
        Severity::Critical
    } else {
        Severity::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_project;
    use crate::types::{
        Admission, Credibility, Fingerprint, OriginKind, RawFinding, Recommendation,
        SourceDescriptor,
    };
    use chrono::Utc;
    use nxt_common::db::{RaidItem, RaidStatus};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedReasoner {
        answer: Result<ReasoningResponse, AnalysisError>,
        delay: Option<Duration>,
        calls: AtomicU32,
    }

    impl ScriptedReasoner {
        fn answering(response: ReasoningResponse) -> Self {
            Self {
                answer: Ok(response),
                delay: None,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(error: AnalysisError) -> Self {
            Self {
                answer: Err(error),
                delay: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ReasoningService for ScriptedReasoner {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn assess(&self, _request: &ReasoningRequest) -> Result<ReasoningResponse, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.answer.clone()
        }
    }

    fn finding(text: &str) -> ValidatedFinding {
        ValidatedFinding {
            raw: RawFinding {
                project_id: "SC001".to_string(),
                source: SourceDescriptor::new(OriginKind::News, "https://www.reuters.com/a"),
                collector: "test".to_string(),
                title: None,
                text: text.to_string(),
                published_at: Some(Utc::now()),
                retrieved_at: Utc::now(),
            },
            credibility: Credibility {
                score: 75,
                authority: 75.0,
                recency: 100.0,
                quality: 50.0,
                corroboration: 0.0,
                flags: Vec::new(),
                recommendation: Recommendation::ApproveModerate,
            },
            fingerprint: Fingerprint {
                digest: "abc123".to_string(),
                summary: "summary".to_string(),
            },
            novel: true,
            admission: Admission::Admitted,
        }
    }

    fn snapshot(items: Vec<RaidItem>) -> ProjectSnapshot {
        ProjectSnapshot {
            project: sample_project("SC001"),
            items,
            velocity: None,
        }
    }

    fn open_issue(severity: Severity) -> RaidItem {
        RaidItem {
            id: "SC001-I-001".to_string(),
            project_id: "SC001".to_string(),
            kind: RaidKind::Issue,
            severity,
            status: RaidStatus::Open,
            description: "Equipment deliveries late".to_string(),
            mitigation: None,
            owner: None,
            deadline: None,
            fingerprint: "f0".to_string(),
            audit_entry_id: 1,
            source_locator: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn slip(delta: f64, severity: Severity) -> ReasoningResponse {
        ReasoningResponse {
            classification: Some(TaxonomyClass::ScheduleSlip),
            raid_kind: Some(RaidKind::Issue),
            severity: Some(severity),
            confidence: 0.9,
            description: "Fab opening delayed".to_string(),
            velocity_delta: Some(delta),
            ..ReasoningResponse::default()
        }
    }

    fn analyzer(reasoner: ScriptedReasoner) -> (Analyzer, Arc<ScriptedReasoner>) {
        let reasoner = Arc::new(reasoner);
        let policy = AnalyzerPolicy {
            timeout: Duration::from_millis(50),
            ..AnalyzerPolicy::default()
        };
        (Analyzer::new(reasoner.clone(), policy), reasoner)
    }

    #[tokio::test]
    async fn test_delta_is_clamped_to_bound() {
        let (analyzer, _) = analyzer(ScriptedReasoner::answering(slip(-25.0, Severity::High)));

        let assessment = analyzer.analyze(&finding("delayed"), &snapshot(vec![]), 1).await.unwrap();

        let delta = assessment.velocity_delta.unwrap();
        assert_eq!(delta.delta, -10.0);
        assert_eq!(delta.related_items, vec![ItemRef::Draft(0)]);
        assert_eq!(assessment.raid_items.len(), 1);
        assert_eq!(assessment.base_version, 0);
    }

    #[tokio::test]
    async fn test_delta_dropped_for_funding_news() {
        let (analyzer, _) = analyzer(ScriptedReasoner::answering(ReasoningResponse {
            classification: Some(TaxonomyClass::FundingPartnership),
            raid_kind: Some(RaidKind::Decision),
            confidence: 0.8,
            velocity_delta: Some(4.0),
            ..ReasoningResponse::default()
        }));

        let assessment = analyzer
            .analyze(&finding("DOE loan closed. Terms undisclosed."), &snapshot(vec![]), 1)
            .await
            .unwrap();

        assert!(assessment.velocity_delta.is_none());
        assert_eq!(assessment.raid_items[0].description, "DOE loan closed.");
        assert_eq!(assessment.raid_items[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_low_confidence_is_inconclusive() {
        let (analyzer, _) = analyzer(ScriptedReasoner::answering(ReasoningResponse {
            confidence: 0.3,
            ..slip(-3.0, Severity::Medium)
        }));

        let assessment = analyzer.analyze(&finding("maybe"), &snapshot(vec![]), 1).await.unwrap();

        assert_eq!(assessment.verdict, inconclusive("low_confidence"));
        assert!(assessment.raid_items.is_empty());
        assert!(assessment.velocity_delta.is_none());
    }

    #[tokio::test]
    async fn test_kind_outside_taxonomy_is_inconclusive() {
        let (analyzer, _) = analyzer(ScriptedReasoner::answering(ReasoningResponse {
            classification: Some(TaxonomyClass::FundingPartnership),
            raid_kind: Some(RaidKind::Action),
            confidence: 0.9,
            ..ReasoningResponse::default()
        }));

        let assessment = analyzer.analyze(&finding("grant"), &snapshot(vec![]), 1).await.unwrap();
        assert_eq!(assessment.verdict, inconclusive("taxonomy_mismatch"));
    }

    #[tokio::test]
    async fn test_timeout_retried_once_then_returned() {
        let (analyzer, reasoner) = analyzer(ScriptedReasoner {
            delay: Some(Duration::from_secs(5)),
            ..ScriptedReasoner::answering(ReasoningResponse::default())
        });

        let result = analyzer.analyze(&finding("slow"), &snapshot(vec![]), 1).await;

        assert!(matches!(result, Err(AnalysisError::Timeout(_))));
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_answer_becomes_inconclusive() {
        let (analyzer, reasoner) =
            analyzer(ScriptedReasoner::failing(AnalysisError::Malformed("not json".into())));

        let assessment = analyzer.analyze(&finding("garbled"), &snapshot(vec![]), 1).await.unwrap();

        assert_eq!(assessment.verdict, inconclusive("analysis_malformed"));
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_critical_downgraded_when_project_already_strained() {
        let (analyzer, _) = analyzer(ScriptedReasoner::answering(slip(-8.0, Severity::Critical)));
        let strained = snapshot(vec![open_issue(Severity::High)]);

        let assessment = analyzer
            .analyze(&finding("Construction halted over a lawsuit."), &strained, 1)
            .await
            .unwrap();
        assert_eq!(assessment.raid_items[0].severity, Severity::High);

        let assessment = analyzer
            .analyze(&finding("The owner cancelled the project."), &strained, 1)
            .await
            .unwrap();
        assert_eq!(assessment.raid_items[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_critical_kept_without_open_high_items() {
        let (analyzer, _) = analyzer(ScriptedReasoner::answering(slip(-8.0, Severity::Critical)));

        let assessment = analyzer
            .analyze(&finding("Construction halted over a lawsuit."), &snapshot(vec![open_issue(Severity::Low)]), 1)
            .await
            .unwrap();
        assert_eq!(assessment.raid_items[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_heuristic_permit_approval_is_decision_without_delta() {
        let analyzer = Analyzer::new(Arc::new(HeuristicReasoner), AnalyzerPolicy::default());

        let assessment = analyzer
            .analyze(
                &finding("The county approved the construction permit in Feb 2024."),
                &snapshot(vec![]),
                7,
            )
            .await
            .unwrap();

        assert_eq!(assessment.verdict, Verdict::Structured);
        assert_eq!(assessment.raid_items.len(), 1);
        assert_eq!(assessment.raid_items[0].kind, RaidKind::Decision);
        assert!(assessment.velocity_delta.is_none());
        assert_eq!(assessment.run_id, 7);
    }

    #[test]
    fn test_first_sentence() {
        assert_eq!(first_sentence("Permit approved. Work starts in May."), "Permit approved.");
        assert_eq!(first_sentence("Raised $1.5 billion. More later"), "Raised $1.5 billion.");
        assert_eq!(first_sentence("no terminator"), "no terminator");
    }
}
