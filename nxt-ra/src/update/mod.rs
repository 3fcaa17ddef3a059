//! Update stage
//!
//! Applies one `ImpactAssessment` to one project inside a single
//! transaction: the update-stage audit entry, RAID item inserts, status
//! transitions, the velocity adjustment, the recomputed velocity score, the
//! removal of the finding from the parked set and, last, the conditional
//! version bump. If the bump finds the project changed
//! since analysis, everything is rolled back and the caller gets
//! `UpdateError::PersistenceConflict`.
//!
//! A run moves a project's score at most `max_delta` either way from where
//! the run found it. The bound covers the whole movement, item penalties
//! included; the recorded adjustment is whatever keeps the score inside it.
//!
//! Writers for one project are serialized on a per-project mutex; no lock
//! spans more than one project.

pub mod velocity;

use crate::db;
use crate::db::audit::NewAuditEntry;
use crate::db::projects::NewProject;
use crate::db::raid_items::NewRaidItem;
use crate::db::velocity::NewAdjustment;
use crate::types::{
    AppliedChanges, ImpactAssessment, ItemRef, UpdateError, UpdateOutcome, UpdateRejection,
    UpdateResult,
};
use crate::utils::{begin_monitored, retry_on_lock};
use chrono::Utc;
use nxt_common::db::{Outcome, RaidItem, RaidKind, Stage, TransitionCheck};
use nxt_common::Result;
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What one transaction attempt ended with
enum Attempt {
    Applied(i64, AppliedChanges),
    Rejected(i64, UpdateRejection),
    Conflict,
}

#[derive(Clone)]
pub struct Updater {
    db: SqlitePool,
    max_delta: f64,
    max_lock_wait_ms: u64,
    partitions: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Updater {
    pub fn new(db: SqlitePool, max_delta: f64, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            max_delta,
            max_lock_wait_ms,
            partitions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lock guarding writes to one project
    async fn partition(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut partitions = self.partitions.lock().await;
        partitions
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Apply an assessment atomically
    ///
    /// Inconclusive assessments carry no items and no delta; the pipeline
    /// does not pass them here.
    ///
    /// Decision outcomes (`invalid_transition`, `unknown_reference`) are
    /// returned as `UpdateOutcome::Rejected` with their audit entry written.
    /// A persistence conflict writes an `update/error` audit entry after the
    /// rollback and returns the error.
    pub async fn apply(&self, assessment: &ImpactAssessment) -> std::result::Result<UpdateResult, UpdateError> {
        let partition = self.partition(&assessment.project_id).await;
        let _guard = partition.lock().await;

        let attempt = retry_on_lock("update::apply", self.max_lock_wait_ms, || self.try_apply(assessment)).await?;

        match attempt {
            Attempt::Applied(audit_entry_id, changes) => {
                info!(
                    project_id = %assessment.project_id,
                    run_id = assessment.run_id,
                    created = changes.created_items.len(),
                    transitioned = changes.transitioned_items.len(),
                    delta = changes.applied_delta,
                    score = changes.velocity.score,
                    "Assessment applied"
                );
                Ok(UpdateResult {
                    audit_entry_id,
                    outcome: UpdateOutcome::Applied(changes),
                })
            }
            Attempt::Rejected(audit_entry_id, rejection) => {
                info!(
                    project_id = %assessment.project_id,
                    run_id = assessment.run_id,
                    reason = rejection.reason(),
                    "Assessment rejected"
                );
                Ok(UpdateResult {
                    audit_entry_id,
                    outcome: UpdateOutcome::Rejected(rejection),
                })
            }
            Attempt::Conflict => {
                warn!(
                    project_id = %assessment.project_id,
                    expected_version = assessment.base_version,
                    "Project changed since analysis, assessment rolled back"
                );
                let entry = NewAuditEntry::new(
                    assessment.run_id,
                    Stage::Update,
                    assessment.project_id.as_str(),
                    Outcome::Error,
                    "persistence_conflict",
                )
                .fingerprint(assessment.fingerprint.as_str())
                .detail(json!({ "expected_version": assessment.base_version }));
                db::audit::append(&self.db, &entry).await?;

                Err(UpdateError::PersistenceConflict {
                    project_id: assessment.project_id.clone(),
                    expected_version: assessment.base_version,
                })
            }
        }
    }

    /// Check an assessment against the item set it would modify
    fn check(assessment: &ImpactAssessment, items: &[RaidItem]) -> Option<UpdateRejection> {
        for transition in &assessment.transitions {
            let Some(item) = items.iter().find(|i| i.id == transition.item_id) else {
                return Some(UpdateRejection::UnknownReference {
                    item_id: transition.item_id.clone(),
                });
            };
            if item.kind.check_transition(item.status, transition.to) == TransitionCheck::Invalid {
                return Some(UpdateRejection::InvalidTransition {
                    item_id: item.id.clone(),
                    from: item.status,
                    to: transition.to,
                });
            }
        }

        if let Some(delta) = &assessment.velocity_delta {
            for reference in &delta.related_items {
                match reference {
                    ItemRef::Existing(id) if !items.iter().any(|i| &i.id == id) => {
                        return Some(UpdateRejection::UnknownReference { item_id: id.clone() });
                    }
                    ItemRef::Draft(index) if *index >= assessment.raid_items.len() => {
                        return Some(UpdateRejection::UnknownReference {
                            item_id: format!("draft:{}", index),
                        });
                    }
                    _ => {}
                }
            }
        }
        None
    }

    /// One transaction attempt; retried as a whole on lock contention
    async fn try_apply(&self, assessment: &ImpactAssessment) -> Result<Attempt> {
        let project_id = assessment.project_id.as_str();
        let mut tx = begin_monitored(&self.db, "update::apply").await?;

        let project = db::projects::get_project(tx.conn(), project_id)
            .await?
            .ok_or_else(|| nxt_common::Error::NotFound(format!("project {}", project_id)))?;
        let items = db::raid_items::list_for_project(tx.conn(), project_id).await?;

        if let Some(rejection) = Self::check(assessment, &items) {
            let entry = NewAuditEntry::new(
                assessment.run_id,
                Stage::Update,
                project_id,
                Outcome::Rejected,
                rejection.reason(),
            )
            .fingerprint(assessment.fingerprint.as_str())
            .detail(serde_json::to_value(&rejection)?);
            let audit_entry_id = db::audit::append(tx.conn(), &entry).await?;
            db::pending::resolve(tx.conn(), project_id, &assessment.fingerprint).await?;
            tx.commit().await?;
            return Ok(Attempt::Rejected(audit_entry_id, rejection));
        }

        // Sequence numbers for the new items, per kind
        let mut next_seq: HashMap<RaidKind, i64> = HashMap::new();
        let mut planned_ids = Vec::with_capacity(assessment.raid_items.len());
        for draft in &assessment.raid_items {
            let seq = match next_seq.get(&draft.kind) {
                Some(seq) => seq + 1,
                None => db::raid_items::max_sequence(tx.conn(), project_id, draft.kind).await? + 1,
            };
            next_seq.insert(draft.kind, seq);
            planned_ids.push((draft, seq, db::raid_items::format_item_id(project_id, draft.kind, seq)));
        }

        let transitions: Vec<_> = assessment
            .transitions
            .iter()
            .filter_map(|t| {
                let item = items.iter().find(|i| i.id == t.item_id)?;
                (item.kind.check_transition(item.status, t.to) == TransitionCheck::Forward)
                    .then_some((item, t))
            })
            .collect();

        let now = Utc::now();
        let adjustments = db::velocity::adjustments_total(tx.conn(), project_id).await?;
        let previous = db::velocity::get_score(tx.conn(), project_id).await?;
        let previous_score = previous.map(|v| v.score).or(project.velocity_score);

        // The run's net movement is measured from the score the project had
        // when this run first wrote to it
        let current = previous_score
            .unwrap_or_else(|| velocity::compute(&project, &items, adjustments, None, now).score);
        db::velocity::record_run_baseline(tx.conn(), project_id, assessment.run_id, current).await?;
        let run_start = db::velocity::run_baseline(tx.conn(), project_id, assessment.run_id)
            .await?
            .unwrap_or(current);

        // Items as they will stand after this assessment
        let mut projected: Vec<RaidItem> = items
            .iter()
            .map(|item| {
                let mut item = item.clone();
                if let Some((_, t)) = transitions.iter().find(|(i, _)| i.id == item.id) {
                    item.status = t.to;
                }
                item
            })
            .collect();
        projected.extend(planned_ids.iter().map(|(draft, _, id)| RaidItem {
            id: id.clone(),
            project_id: project_id.to_string(),
            kind: draft.kind,
            severity: draft.severity,
            status: draft.kind.initial_status(),
            description: draft.description.clone(),
            mitigation: draft.mitigation.clone(),
            owner: draft.owner.clone(),
            deadline: draft.deadline,
            fingerprint: assessment.fingerprint.clone(),
            audit_entry_id: 0,
            source_locator: assessment.source_locator.clone(),
            created_at: now,
            updated_at: now,
        }));

        // The bound covers the whole movement; the adjustment absorbs any excess
        let requested = assessment.velocity_delta.as_ref().map_or(0.0, |d| d.delta);
        let raw = velocity::raw_score(&project, &projected, adjustments + requested, now);
        let bounded = raw.clamp(run_start - self.max_delta, run_start + self.max_delta);
        let applied_delta = velocity::round1(requested + bounded - raw);
        let projected_score = velocity::round1(bounded.clamp(0.0, 100.0));

        let audit_entry_id = db::audit::append(
            tx.conn(),
            &NewAuditEntry::new(assessment.run_id, Stage::Update, project_id, Outcome::Accepted, "applied")
                .fingerprint(assessment.fingerprint.as_str())
                .detail(json!({
                    "created_items": planned_ids.iter().map(|(_, _, id)| id).collect::<Vec<_>>(),
                    "transitions": transitions
                        .iter()
                        .map(|(item, t)| json!({ "item_id": item.id, "from": item.status, "to": t.to }))
                        .collect::<Vec<_>>(),
                    "requested_delta": requested,
                    "applied_delta": applied_delta,
                    "run_start_score": run_start,
                    "projected_score": projected_score,
                    "base_version": assessment.base_version,
                })),
        )
        .await?;

        let mut created_items = Vec::with_capacity(planned_ids.len());
        for (draft, seq, _) in &planned_ids {
            let id = db::raid_items::insert_item(
                tx.conn(),
                &NewRaidItem {
                    project_id,
                    kind: draft.kind,
                    seq: *seq,
                    severity: draft.severity,
                    description: &draft.description,
                    mitigation: draft.mitigation.as_deref(),
                    owner: draft.owner.as_deref(),
                    deadline: draft.deadline,
                    fingerprint: &assessment.fingerprint,
                    audit_entry_id,
                    source_locator: assessment.source_locator.as_deref(),
                },
            )
            .await?;
            created_items.push(id);
        }

        let mut transitioned_items = Vec::with_capacity(transitions.len());
        for (item, transition) in &transitions {
            db::raid_items::set_status(tx.conn(), &item.id, transition.to).await?;
            db::raid_items::insert_transition(
                tx.conn(),
                &item.id,
                item.status,
                transition.to,
                transition.note.as_deref(),
                &assessment.fingerprint,
                audit_entry_id,
            )
            .await?;
            transitioned_items.push(item.id.clone());
        }

        if applied_delta != 0.0 {
            let (justification, related): (String, Vec<String>) = match &assessment.velocity_delta {
                Some(delta) => (
                    delta.justification.clone(),
                    delta
                        .related_items
                        .iter()
                        .filter_map(|r| match r {
                            ItemRef::Existing(id) => Some(id.clone()),
                            ItemRef::Draft(index) => created_items.get(*index).cloned(),
                        })
                        .collect(),
                ),
                None => (
                    format!("Bounded to {} per run", self.max_delta),
                    created_items.clone(),
                ),
            };
            db::velocity::insert_adjustment(
                tx.conn(),
                &NewAdjustment {
                    project_id,
                    run_id: assessment.run_id,
                    delta: applied_delta,
                    justification: &justification,
                    related_items: &related,
                    fingerprint: &assessment.fingerprint,
                    audit_entry_id,
                },
            )
            .await?;
        }

        let items = db::raid_items::list_for_project(tx.conn(), project_id).await?;
        let score = velocity::compute(&project, &items, adjustments + applied_delta, previous_score, now);
        db::velocity::upsert_score(tx.conn(), &score).await?;
        db::pending::resolve(tx.conn(), project_id, &assessment.fingerprint).await?;

        // Must stay the last statement: it is the conflict check
        let bumped = db::projects::bump_version(tx.conn(), project_id, assessment.base_version, score.score).await?;
        if !bumped {
            tx.rollback().await?;
            return Ok(Attempt::Conflict);
        }
        tx.commit().await?;

        debug!(project_id, audit_entry_id, "Update committed");

        Ok(Attempt::Applied(
            audit_entry_id,
            AppliedChanges {
                created_items,
                transitioned_items,
                applied_delta,
                previous_score,
                velocity: score,
                new_version: assessment.base_version + 1,
            },
        ))
    }
}

/// Insert seed projects and their initial velocity scores; existing ids are
/// left untouched. Returns the number of projects inserted.
pub async fn seed_portfolio(pool: &SqlitePool, projects: &[NewProject]) -> Result<usize> {
    let mut inserted = 0;
    for new in projects {
        if !db::projects::insert_project(pool, new).await? {
            debug!(project_id = %new.id, "Project already present, skipping");
            continue;
        }
        inserted += 1;
        if let Some(project) = db::projects::get_project(pool, &new.id).await? {
            let score = velocity::compute(&project, &[], 0.0, None, Utc::now());
            db::velocity::upsert_score(pool, &score).await?;
            db::projects::set_initial_velocity(pool, &project.id, score.score).await?;
        }
    }
    info!(inserted, total = projects.len(), "Portfolio seeded");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_new_project, test_pool};
    use crate::types::{
        Admission, Credibility, Fingerprint, OriginKind, ProposedTransition, RaidDraft, RawFinding,
        Recommendation, SourceDescriptor, ValidatedFinding, Verdict, VelocityDelta,
    };
    use nxt_common::db::{RaidStatus, Severity};

    async fn setup() -> (tempfile::TempDir, SqlitePool, i64) {
        let (dir, pool) = test_pool().await;
        seed_portfolio(&pool, &[sample_new_project("BT015")]).await.unwrap();
        let run_id = db::runs::start_run(&pool).await.unwrap();
        (dir, pool, run_id)
    }

    fn assessment(run_id: i64, base_version: i64, fingerprint: &str) -> ImpactAssessment {
        ImpactAssessment {
            project_id: "BT015".to_string(),
            run_id,
            base_version,
            fingerprint: fingerprint.to_string(),
            source_locator: Some("https://www.maricopa.gov/permits/1".to_string()),
            classification: None,
            confidence: 0.8,
            verdict: Verdict::Structured,
            raid_items: Vec::new(),
            transitions: Vec::new(),
            velocity_delta: None,
        }
    }

    fn draft(kind: RaidKind, severity: Severity, description: &str) -> RaidDraft {
        RaidDraft {
            kind,
            severity,
            description: description.to_string(),
            mitigation: None,
            owner: None,
            deadline: None,
        }
    }

    fn slip(delta: f64) -> VelocityDelta {
        VelocityDelta {
            delta,
            justification: "slip".to_string(),
            related_items: vec![ItemRef::Draft(0)],
        }
    }

    fn applied(result: UpdateResult) -> AppliedChanges {
        match result.outcome {
            UpdateOutcome::Applied(changes) => changes,
            other => panic!("expected applied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decision_applied_with_provenance() {
        let (_dir, pool, run_id) = setup().await;
        let updater = Updater::new(pool.clone(), 10.0, 1000);

        let mut a = assessment(run_id, 0, "digest-1");
        a.raid_items.push(draft(RaidKind::Decision, Severity::Low, "Construction permit approved"));

        let result = updater.apply(&a).await.unwrap();
        let audit_entry_id = result.audit_entry_id;
        let changes = applied(result);

        assert_eq!(changes.created_items, vec!["BT015-D-001"]);
        assert_eq!(changes.velocity.score, 65.0);
        assert_eq!(changes.previous_score, Some(65.0));
        assert_eq!(changes.new_version, 1);

        let items = db::raid_items::list_for_project(&pool, "BT015").await.unwrap();
        assert_eq!(items[0].status, RaidStatus::Recorded);
        assert_eq!(items[0].fingerprint, "digest-1");
        assert_eq!(items[0].audit_entry_id, audit_entry_id);
    }

    #[tokio::test]
    async fn test_run_budget_bounds_net_delta() {
        let (_dir, pool, run_id) = setup().await;
        let updater = Updater::new(pool.clone(), 10.0, 1000);

        let mut first = assessment(run_id, 0, "digest-1");
        first.raid_items.push(draft(RaidKind::Issue, Severity::Low, "Opening delayed"));
        first.velocity_delta = Some(slip(-8.0));
        let changes = applied(updater.apply(&first).await.unwrap());
        assert_eq!(changes.applied_delta, -8.0);
        // 65 - 8 adjustment - 1 open low issue
        assert_eq!(changes.velocity.score, 56.0);

        let mut second = assessment(run_id, 1, "digest-2");
        second.raid_items.push(draft(RaidKind::Issue, Severity::Low, "Second delay"));
        second.velocity_delta = Some(slip(-8.0));
        let changes = applied(updater.apply(&second).await.unwrap());

        // The second issue alone takes the run to its floor of 55
        assert_eq!(changes.applied_delta, 0.0);
        assert_eq!(
            db::velocity::run_adjustments_total(&pool, "BT015", run_id).await.unwrap(),
            -8.0
        );
        assert_eq!(changes.velocity.score, 55.0);
        assert_eq!(changes.previous_score, Some(56.0));
    }

    #[tokio::test]
    async fn test_new_issue_penalty_counts_against_run_bound() {
        let (_dir, pool, run_id) = setup().await;
        let updater = Updater::new(pool.clone(), 10.0, 1000);

        let mut halted = assessment(run_id, 0, "digest-1");
        halted.raid_items.push(draft(RaidKind::Issue, Severity::Critical, "Construction halted"));
        halted.velocity_delta = Some(slip(-8.0));
        let result = updater.apply(&halted).await.unwrap();
        let entry_id = result.audit_entry_id;
        let changes = applied(result);

        // 65 - 8 requested - 8 critical issue would be 49
        assert_eq!(changes.applied_delta, -2.0);
        assert_eq!(changes.velocity.score, 55.0);

        let audit = db::audit::list_for_run(&pool, run_id).await.unwrap();
        let entry = audit.iter().find(|e| e.id == entry_id).unwrap();
        let detail = entry.detail.as_ref().unwrap();
        assert_eq!(detail["requested_delta"], -8.0);
        assert_eq!(detail["applied_delta"], -2.0);
        assert_eq!(detail["run_start_score"], 65.0);
        assert_eq!(detail["projected_score"], 55.0);

        // No delta requested, but the new issue alone would breach the bound
        let mut second = assessment(run_id, 1, "digest-2");
        second.raid_items.push(draft(RaidKind::Issue, Severity::High, "Supplier dispute"));
        let changes = applied(updater.apply(&second).await.unwrap());

        assert_eq!(changes.applied_delta, 5.0);
        assert_eq!(changes.velocity.score, 55.0);

        let adjustments = db::velocity::list_adjustments(&pool, "BT015").await.unwrap();
        assert_eq!(adjustments.len(), 2);
        assert_eq!(adjustments[1].related_items, vec!["BT015-I-002".to_string()]);

        // A later run is measured from where this one ended
        let next_run = db::runs::start_run(&pool).await.unwrap();
        let mut third = assessment(next_run, 2, "digest-3");
        third.raid_items.push(draft(RaidKind::Issue, Severity::Medium, "Crane shortage"));
        third.velocity_delta = Some(slip(-3.0));
        let changes = applied(updater.apply(&third).await.unwrap());

        assert_eq!(changes.applied_delta, -3.0);
        assert_eq!(changes.velocity.score, 50.0);
    }

    #[tokio::test]
    async fn test_backward_transition_rejected_and_item_unchanged() {
        let (_dir, pool, run_id) = setup().await;
        let updater = Updater::new(pool.clone(), 10.0, 1000);

        let mut create = assessment(run_id, 0, "digest-1");
        create.raid_items.push(draft(RaidKind::Action, Severity::Medium, "Obtain air permit"));
        updater.apply(&create).await.unwrap();

        let mut complete = assessment(run_id, 1, "digest-2");
        complete.transitions.push(ProposedTransition {
            item_id: "BT015-A-001".to_string(),
            to: RaidStatus::Completed,
            note: None,
        });
        let changes = applied(updater.apply(&complete).await.unwrap());
        assert_eq!(changes.transitioned_items, vec!["BT015-A-001"]);

        let mut reopen = assessment(run_id, 2, "digest-3");
        reopen.raid_items.push(draft(RaidKind::Decision, Severity::Low, "Ignored"));
        reopen.transitions.push(ProposedTransition {
            item_id: "BT015-A-001".to_string(),
            to: RaidStatus::Pending,
            note: None,
        });
        let result = updater.apply(&reopen).await.unwrap();

        assert!(matches!(
            result.outcome,
            UpdateOutcome::Rejected(UpdateRejection::InvalidTransition { .. })
        ));
        let items = db::raid_items::list_for_project(&pool, "BT015").await.unwrap();
        assert_eq!(items.len(), 1, "rejected assessment creates nothing");
        assert_eq!(items[0].status, RaidStatus::Completed);

        let project = db::projects::get_project(&pool, "BT015").await.unwrap().unwrap();
        assert_eq!(project.version, 2);
    }

    #[tokio::test]
    async fn test_unknown_reference_rejected() {
        let (_dir, pool, run_id) = setup().await;
        let updater = Updater::new(pool.clone(), 10.0, 1000);

        let mut a = assessment(run_id, 0, "digest-1");
        a.raid_items.push(draft(RaidKind::Issue, Severity::High, "Delay"));
        a.velocity_delta = Some(VelocityDelta {
            delta: -3.0,
            justification: "slip".to_string(),
            related_items: vec![ItemRef::Existing("BT015-R-009".to_string())],
        });

        let result = updater.apply(&a).await.unwrap();
        assert!(matches!(
            result.outcome,
            UpdateOutcome::Rejected(UpdateRejection::UnknownReference { ref item_id }) if item_id == "BT015-R-009"
        ));
        assert_eq!(db::raid_items::count_for_project(&pool, "BT015").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_conflict_rolls_back_everything() {
        let (_dir, pool, run_id) = setup().await;
        let updater = Updater::new(pool.clone(), 10.0, 1000);
        let before = db::velocity::get_score(&pool, "BT015").await.unwrap().unwrap();

        // Someone else committed after analysis read version 0
        assert!(db::projects::bump_version(&pool, "BT015", 0, before.score).await.unwrap());

        let mut stale = assessment(run_id, 0, "digest-1");
        stale.raid_items.push(draft(RaidKind::Issue, Severity::Critical, "Plant halted"));
        stale.velocity_delta = Some(slip(-8.0));

        let err = updater.apply(&stale).await.unwrap_err();
        assert!(matches!(err, UpdateError::PersistenceConflict { expected_version: 0, .. }));

        assert_eq!(db::raid_items::count_for_project(&pool, "BT015").await.unwrap(), 0);
        assert_eq!(db::velocity::adjustments_total(&pool, "BT015").await.unwrap(), 0.0);
        let after = db::velocity::get_score(&pool, "BT015").await.unwrap().unwrap();
        assert_eq!(after.score, before.score);
        assert_eq!(after.updated_at, before.updated_at);

        let audit = db::audit::list_for_run(&pool, run_id).await.unwrap();
        assert_eq!(audit.len(), 1, "only the conflict itself is recorded");
        assert_eq!(audit[0].outcome, Outcome::Error);
        assert_eq!(audit[0].reason, "persistence_conflict");
    }

    fn parked(digest: &str) -> ValidatedFinding {
        ValidatedFinding {
            raw: RawFinding {
                project_id: "BT015".to_string(),
                source: SourceDescriptor::new(OriginKind::Permit, "https://www.maricopa.gov/permits/1"),
                collector: "feeds".to_string(),
                title: None,
                text: "Opening delayed".to_string(),
                published_at: Some(Utc::now()),
                retrieved_at: Utc::now(),
            },
            credibility: Credibility {
                score: 80,
                authority: 90.0,
                recency: 100.0,
                quality: 50.0,
                corroboration: 0.0,
                flags: Vec::new(),
                recommendation: Recommendation::ApproveModerate,
            },
            fingerprint: Fingerprint {
                digest: digest.to_string(),
                summary: "opening delayed".to_string(),
            },
            novel: true,
            admission: Admission::Admitted,
        }
    }

    #[tokio::test]
    async fn test_parked_finding_cleared_only_with_committed_update() {
        let (_dir, pool, run_id) = setup().await;
        let updater = Updater::new(pool.clone(), 10.0, 1000);
        db::pending::defer(&pool, &parked("digest-1"), "analysis_timeout", run_id).await.unwrap();

        assert!(db::projects::bump_version(&pool, "BT015", 0, 65.0).await.unwrap());
        let mut stale = assessment(run_id, 0, "digest-1");
        stale.raid_items.push(draft(RaidKind::Issue, Severity::Low, "Opening delayed"));
        updater.apply(&stale).await.unwrap_err();
        assert_eq!(db::pending::count(&pool).await.unwrap(), 1, "rolled back with the update");

        let mut fresh = assessment(run_id, 1, "digest-1");
        fresh.raid_items.push(draft(RaidKind::Issue, Severity::Low, "Opening delayed"));
        applied(updater.apply(&fresh).await.unwrap());
        assert_eq!(db::pending::count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_assessment_clears_parked_finding() {
        let (_dir, pool, run_id) = setup().await;
        let updater = Updater::new(pool.clone(), 10.0, 1000);
        db::pending::defer(&pool, &parked("digest-1"), "persistence_conflict", run_id).await.unwrap();

        let mut a = assessment(run_id, 0, "digest-1");
        a.transitions.push(ProposedTransition {
            item_id: "BT015-A-404".to_string(),
            to: RaidStatus::Completed,
            note: None,
        });
        let result = updater.apply(&a).await.unwrap();

        assert!(matches!(result.outcome, UpdateOutcome::Rejected(_)));
        assert_eq!(db::pending::count(&pool).await.unwrap(), 0);
    }
}
