//! Core types and stage traits for the research pipeline
//!
//! Stages, leaf first:
//! - **Collection:** `SourceCollector` implementations produce `RawFinding`s
//! - **Validation:** credibility + novelty produce a `ValidatedFinding`
//! - **Analysis:** a `ReasoningService` turns admitted findings into an `ImpactAssessment`
//! - **Update:** the assessment is applied to persisted project state in one transaction
//!
//! Decision outcomes (`low_credibility`, `duplicate`, `inconclusive`,
//! `invalid_transition`, `unknown_reference`) are plain values in this module.
//! Only genuine failures are errors.

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::BoxStream;
use nxt_common::db::{Project, RaidItem, RaidKind, RaidStatus, Severity, VelocityScore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Collection
// ============================================================================

/// Kind of origin a finding came from; drives the credibility prior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    Filing,
    Permit,
    Government,
    GridQueue,
    PressRelease,
    News,
    Unknown,
}

impl OriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::Filing => "filing",
            OriginKind::Permit => "permit",
            OriginKind::Government => "government",
            OriginKind::GridQueue => "grid_queue",
            OriginKind::PressRelease => "press_release",
            OriginKind::News => "news",
            OriginKind::Unknown => "unknown",
        }
    }
}

/// Where a finding came from: origin kind plus a locator (URL or file path)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub origin: OriginKind,
    pub locator: String,
    /// Publisher name when the locator does not identify it (feed drops)
    #[serde(default)]
    pub publisher: Option<String>,
}

impl SourceDescriptor {
    pub fn new(origin: OriginKind, locator: impl Into<String>) -> Self {
        Self {
            origin,
            locator: locator.into(),
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }

    /// Lowercased host of the locator, without `www.`; falls back to the
    /// publisher name, then the locator itself.
    pub fn domain(&self) -> String {
        let locator = self.locator.trim();
        if let Some(rest) = locator
            .strip_prefix("https://")
            .or_else(|| locator.strip_prefix("http://"))
        {
            let host = rest.split(['/', '?', '#', ':']).next().unwrap_or(rest);
            return host.trim_start_matches("www.").to_lowercase();
        }
        match &self.publisher {
            Some(p) => p.to_lowercase(),
            None => locator.to_lowercase(),
        }
    }
}

/// Unstructured candidate finding produced by a collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFinding {
    pub project_id: String,
    pub source: SourceDescriptor,
    /// Collector that produced the finding
    pub collector: String,
    pub title: Option<String>,
    pub text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub retrieved_at: DateTime<Utc>,
}

impl RawFinding {
    /// Title and body joined, as analysed downstream
    pub fn full_text(&self) -> String {
        match &self.title {
            Some(title) if !self.text.contains(title.as_str()) => {
                format!("{}. {}", title, self.text)
            }
            _ => self.text.clone(),
        }
    }
}

/// Input to a collector for one project
#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub project: Project,
    /// Only findings published after this instant are wanted
    pub since: DateTime<Utc>,
    pub max_findings: usize,
}

/// Lazy, finite sequence of findings from one collector
pub type FindingStream<'a> = BoxStream<'a, Result<RawFinding, CollectorError>>;

/// Collector contract: produce zero or more findings for a project
///
/// # Example
/// ```rust,ignore
/// pub struct PermitPortal;
///
/// impl SourceCollector for PermitPortal {
///     fn name(&self) -> &'static str { "permit_portal" }
///     fn origin(&self) -> OriginKind { OriginKind::Permit }
///
///     fn collect<'a>(&'a self, req: &'a CollectRequest) -> FindingStream<'a> {
///         Box::pin(async_stream::try_stream! {
///             for notice in fetch_notices(&req.project.id).await? {
///                 yield notice.into_finding(&req.project.id);
///             }
///         })
///     }
/// }
/// ```
pub trait SourceCollector: Send + Sync {
    /// Collector name for logging and audit entries
    fn name(&self) -> &'static str;

    /// Default origin kind of the findings this collector yields
    fn origin(&self) -> OriginKind;

    /// Whether the collector has anything to ask about this project
    fn applies_to(&self, _project: &Project) -> bool {
        true
    }

    /// Produce findings for a project, in source order
    ///
    /// Ending without yielding anything means `SourceEmpty`.
    fn collect<'a>(&'a self, req: &'a CollectRequest) -> FindingStream<'a>;
}

/// Collector failure; always project-scoped and non-fatal to the run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectorError {
    /// Network, auth, non-2xx or timeout; retried with backoff
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Source answered but had nothing new
    #[error("Source returned no new content")]
    SourceEmpty,

    /// Source answered with content that could not be parsed
    #[error("Source content malformed: {0}")]
    SourceMalformed(String),
}

impl CollectorError {
    /// Reason string recorded in the audit log
    pub fn reason(&self) -> &'static str {
        match self {
            CollectorError::SourceUnavailable(_) => "source_unavailable",
            CollectorError::SourceEmpty => "source_empty",
            CollectorError::SourceMalformed(_) => "source_malformed",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CollectorError::SourceUnavailable(_))
    }
}

impl From<reqwest::Error> for CollectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CollectorError::SourceMalformed(e.to_string())
        } else {
            CollectorError::SourceUnavailable(e.to_string())
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Why a finding was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    LowCredibility,
    Duplicate,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::LowCredibility => "low_credibility",
            RejectionReason::Duplicate => "duplicate",
        }
    }
}

/// Admission decision for one finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum Admission {
    Admitted,
    Rejected(RejectionReason),
}

/// Annotations recorded with a credibility score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredibilityFlag {
    PrimarySource,
    HighAuthoritySource,
    LowAuthoritySource,
    VeryRecent,
    StaleData,
    UnknownPublicationDate,
    Corroborated,
    ThinContent,
    SpamIndicators,
}

/// Recommendation tier derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    ApproveModerate,
    HoldForCorroboration,
    Reject,
}

/// Credibility breakdown; `score` is the bounded 0-100 result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credibility {
    pub score: u8,
    pub authority: f64,
    pub recency: f64,
    pub quality: f64,
    pub corroboration: f64,
    pub flags: Vec<CredibilityFlag>,
    pub recommendation: Recommendation,
}

/// Content-derived digest plus the normalized summary it was computed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub digest: String,
    pub summary: String,
}

/// A raw finding after credibility and novelty checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedFinding {
    pub raw: RawFinding,
    pub credibility: Credibility,
    pub fingerprint: Fingerprint,
    /// False when the fingerprint (or locator + date) was already known
    pub novel: bool,
    pub admission: Admission,
}

impl ValidatedFinding {
    pub fn is_admitted(&self) -> bool {
        self.admission == Admission::Admitted
    }

    pub fn rejection(&self) -> Option<RejectionReason> {
        match self.admission {
            Admission::Admitted => None,
            Admission::Rejected(reason) => Some(reason),
        }
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// Fixed taxonomy of finding subjects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyClass {
    /// Delay, postponement or pause: risk (forward-looking) or issue (happened)
    ScheduleSlip,
    /// Funding, financing, partnership news: decision
    FundingPartnership,
    /// Permit, filing, procurement milestone: action, or decision once granted
    RegulatoryMilestone,
    /// Milestone completed or schedule accelerated: decision
    MilestoneProgress,
}

impl TaxonomyClass {
    pub const ALL: [TaxonomyClass; 4] = [
        TaxonomyClass::ScheduleSlip,
        TaxonomyClass::FundingPartnership,
        TaxonomyClass::RegulatoryMilestone,
        TaxonomyClass::MilestoneProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonomyClass::ScheduleSlip => "schedule_slip",
            TaxonomyClass::FundingPartnership => "funding_partnership",
            TaxonomyClass::RegulatoryMilestone => "regulatory_milestone",
            TaxonomyClass::MilestoneProgress => "milestone_progress",
        }
    }

    /// RAID kinds a finding of this class may produce
    pub fn allowed_kinds(&self) -> &'static [RaidKind] {
        match self {
            TaxonomyClass::ScheduleSlip => &[RaidKind::Risk, RaidKind::Issue],
            TaxonomyClass::FundingPartnership => &[RaidKind::Decision],
            TaxonomyClass::RegulatoryMilestone => &[RaidKind::Action, RaidKind::Decision],
            TaxonomyClass::MilestoneProgress => &[RaidKind::Decision],
        }
    }

    /// Whether findings of this class may move the velocity score
    pub fn bears_on_schedule(&self) -> bool {
        matches!(
            self,
            TaxonomyClass::ScheduleSlip | TaxonomyClass::MilestoneProgress
        )
    }
}

/// Compact view of an existing RAID item given to the reasoning service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub kind: RaidKind,
    pub severity: Severity,
    pub status: RaidStatus,
    pub description: String,
}

impl From<&RaidItem> for ItemSummary {
    fn from(item: &RaidItem) -> Self {
        Self {
            id: item.id.clone(),
            kind: item.kind,
            severity: item.severity,
            status: item.status,
            description: item.description.clone(),
        }
    }
}

/// Project state read at analysis time
#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    pub project: Project,
    pub items: Vec<RaidItem>,
    pub velocity: Option<VelocityScore>,
}

impl ProjectSnapshot {
    /// Items still counted against the project
    pub fn active_items(&self) -> impl Iterator<Item = &RaidItem> {
        self.items.iter().filter(|i| i.status.is_active())
    }

    /// One-paragraph summary handed to the reasoning service
    pub fn summary(&self) -> String {
        let p = &self.project;
        let mut summary = format!(
            "{} ({}) - {} in {}; status {}; investment ${:.1}B",
            p.name, p.id, p.category, p.location, p.status, p.investment_billions
        );
        if let Some(date) = p.current_completion {
            summary.push_str(&format!("; expected completion {}", date));
        }
        if let Some(v) = &self.velocity {
            summary.push_str(&format!("; velocity {:.1} ({})", v.score, v.health.as_str()));
        }
        let active = self.active_items().count();
        summary.push_str(&format!("; {} active RAID items", active));
        summary
    }
}

/// Request to a reasoning backend
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningRequest {
    pub project_id: String,
    pub finding_text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub project_summary: String,
    pub taxonomy: Vec<TaxonomyClass>,
    pub active_items: Vec<ItemSummary>,
}

/// Status change proposed for an existing item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedTransition {
    pub item_id: String,
    pub to: RaidStatus,
    #[serde(default)]
    pub note: Option<String>,
}

/// Structured answer from a reasoning backend
///
/// Field names double as the JSON schema requested from remote backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningResponse {
    #[serde(default)]
    pub classification: Option<TaxonomyClass>,
    #[serde(default)]
    pub raid_kind: Option<RaidKind>,
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Classification confidence, 0.0-1.0
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mitigation: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub velocity_delta: Option<f64>,
    #[serde(default)]
    pub justification: Option<String>,
    /// Existing item ids the delta relates to
    #[serde(default)]
    pub related_items: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<ProposedTransition>,
}

/// Reasoning backend contract
#[async_trait::async_trait]
pub trait ReasoningService: Send + Sync {
    /// Backend name for logging and audit detail
    fn name(&self) -> &'static str;

    /// Classify a finding against the fixed taxonomy
    ///
    /// # Errors
    /// `AnalysisError::Timeout` for timeouts and non-2xx answers,
    /// `AnalysisError::Malformed` for unparseable answers.
    async fn assess(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, AnalysisError>;
}

/// Analysis failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Analysis timed out: {0}")]
    Timeout(String),

    #[error("Analysis response malformed: {0}")]
    Malformed(String),
}

impl AnalysisError {
    pub fn reason(&self) -> &'static str {
        match self {
            AnalysisError::Timeout(_) => "analysis_timeout",
            AnalysisError::Malformed(_) => "analysis_malformed",
        }
    }
}

/// New RAID item proposed by an assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaidDraft {
    pub kind: RaidKind,
    pub severity: Severity,
    pub description: String,
    pub mitigation: Option<String>,
    pub owner: Option<String>,
    pub deadline: Option<NaiveDate>,
}

/// Reference from a velocity delta to the item(s) justifying it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum ItemRef {
    /// Item already persisted for the project
    Existing(String),
    /// Index into the same assessment's `raid_items`
    Draft(usize),
}

/// Proposed velocity change, already bounded by the analysis stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityDelta {
    pub delta: f64,
    pub justification: String,
    pub related_items: Vec<ItemRef>,
}

/// Whether the assessment carries structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum Verdict {
    Structured,
    /// No RAID items and a zero delta; `cause` explains why
    Inconclusive { cause: String },
}

/// Structured impact of one admitted finding on one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub project_id: String,
    pub run_id: i64,
    /// Project `version` read when the assessment was made
    pub base_version: i64,
    pub fingerprint: String,
    pub source_locator: Option<String>,
    pub classification: Option<TaxonomyClass>,
    pub confidence: f64,
    pub verdict: Verdict,
    pub raid_items: Vec<RaidDraft>,
    pub transitions: Vec<ProposedTransition>,
    pub velocity_delta: Option<VelocityDelta>,
}

impl ImpactAssessment {
    pub fn is_inconclusive(&self) -> bool {
        matches!(self.verdict, Verdict::Inconclusive { .. })
    }
}

// ============================================================================
// Update
// ============================================================================

/// Why an assessment was refused by the update stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum UpdateRejection {
    InvalidTransition {
        item_id: String,
        from: RaidStatus,
        to: RaidStatus,
    },
    UnknownReference {
        item_id: String,
    },
}

impl UpdateRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            UpdateRejection::InvalidTransition { .. } => "invalid_transition",
            UpdateRejection::UnknownReference { .. } => "unknown_reference",
        }
    }
}

/// What an applied assessment changed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedChanges {
    pub created_items: Vec<String>,
    pub transitioned_items: Vec<String>,
    /// Delta after both per-assessment and per-run bounds
    pub applied_delta: f64,
    pub previous_score: Option<f64>,
    pub velocity: VelocityScore,
    pub new_version: i64,
}

/// Result of `Updater::apply`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub audit_entry_id: i64,
    pub outcome: UpdateOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum UpdateOutcome {
    Applied(AppliedChanges),
    Rejected(UpdateRejection),
}

/// Update failure
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Project state changed outside this transaction; nothing was written
    #[error("Persistence conflict on project {project_id} (expected version {expected_version})")]
    PersistenceConflict {
        project_id: String,
        expected_version: i64,
    },

    #[error(transparent)]
    Common(#[from] nxt_common::Error),
}

impl From<sqlx::Error> for UpdateError {
    fn from(e: sqlx::Error) -> Self {
        UpdateError::Common(nxt_common::Error::Database(e))
    }
}
