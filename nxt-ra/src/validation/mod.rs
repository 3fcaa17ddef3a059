//! Validation stage
//!
//! Scores each raw finding for credibility, fingerprints it, and admits it
//! through the fingerprint store. Admission is a single conditional insert
//! (`db::fingerprints::try_admit`), so near-simultaneous duplicates for one
//! project can never both be admitted. The fingerprint is recorded before
//! analysis starts.

pub mod credibility;
pub mod fingerprint;

use crate::config::Settings;
use crate::db;
use crate::types::{
    Admission, Credibility, Fingerprint, RawFinding, RejectionReason, ValidatedFinding,
};
use crate::utils::retry_on_lock;
use chrono::{DateTime, Utc};
use nxt_common::Result;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::debug;

/// Token-set similarity at which two findings count as the same report
pub const CORROBORATION_SIMILARITY: f64 = 0.35;

/// A scored, fingerprinted finding that has not yet been through the gate
#[derive(Debug, Clone)]
pub struct Candidate {
    pub raw: RawFinding,
    pub credibility: Credibility,
    pub fingerprint: Fingerprint,
}

#[derive(Clone)]
pub struct Validator {
    db: SqlitePool,
    credibility_floor: u8,
    max_lock_wait_ms: u64,
}

impl Validator {
    pub fn new(db: SqlitePool, credibility_floor: u32, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            credibility_floor: credibility_floor.min(100) as u8,
            max_lock_wait_ms,
        }
    }

    pub fn from_settings(db: SqlitePool, settings: &Settings) -> Self {
        Self::new(db, settings.credibility_floor, settings.db_max_lock_wait_ms)
    }

    pub fn credibility_floor(&self) -> u8 {
        self.credibility_floor
    }

    /// Score a project's findings from one run together
    ///
    /// Corroboration is only visible within a batch: a finding is
    /// corroborated when another finding from a different source domain has
    /// a similar normalized token set.
    pub fn prepare(&self, batch: Vec<RawFinding>) -> Vec<Candidate> {
        self.prepare_at(batch, Utc::now())
    }

    pub fn prepare_at(&self, batch: Vec<RawFinding>, now: DateTime<Utc>) -> Vec<Candidate> {
        let profiles: Vec<(String, BTreeSet<String>)> = batch
            .iter()
            .map(|raw| {
                (
                    raw.source.domain(),
                    fingerprint::normalized_tokens(&raw.full_text()),
                )
            })
            .collect();

        batch
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let (domain, tokens) = &profiles[i];
                let corroborated = profiles.iter().enumerate().any(|(j, (other_domain, other_tokens))| {
                    j != i
                        && other_domain != domain
                        && fingerprint::jaccard(tokens, other_tokens) >= CORROBORATION_SIMILARITY
                });
                Self::candidate(raw, corroborated, now)
            })
            .collect()
    }

    fn candidate(raw: RawFinding, corroborated: bool, now: DateTime<Utc>) -> Candidate {
        let credibility = credibility::assess(&raw, corroborated, now);
        let fingerprint = fingerprint::compute(&raw.project_id, &raw.full_text());
        Candidate {
            raw,
            credibility,
            fingerprint,
        }
    }

    /// Validate a single finding on its own (no corroboration)
    pub async fn validate(&self, raw: RawFinding, run_id: i64) -> Result<ValidatedFinding> {
        let candidate = Self::candidate(raw, false, Utc::now());
        self.admit(candidate, run_id).await
    }

    /// Apply the credibility floor, then the novelty gate
    ///
    /// A finding below the floor is rejected without touching the store;
    /// otherwise its fingerprint is inserted atomically and a lost race (or
    /// a known locator + publication date) is a duplicate.
    pub async fn admit(&self, candidate: Candidate, run_id: i64) -> Result<ValidatedFinding> {
        let Candidate {
            raw,
            credibility,
            fingerprint,
        } = candidate;
        let project_id = raw.project_id.clone();

        if credibility.score < self.credibility_floor {
            let known = db::fingerprints::contains(&self.db, &project_id, &fingerprint.digest).await?;
            debug!(
                project_id = %project_id,
                score = credibility.score,
                floor = self.credibility_floor,
                "Finding below credibility floor"
            );
            return Ok(ValidatedFinding {
                raw,
                credibility,
                fingerprint,
                novel: !known,
                admission: Admission::Rejected(RejectionReason::LowCredibility),
            });
        }

        let locator = raw.source.locator.as_str();
        let published_on = raw.published_at.map(|dt| dt.date_naive());
        let admitted = retry_on_lock("fingerprints::try_admit", self.max_lock_wait_ms, || {
            db::fingerprints::try_admit(
                &self.db,
                &project_id,
                &fingerprint,
                Some(locator),
                published_on,
                run_id,
            )
        })
        .await?;

        debug!(
            project_id = %project_id,
            digest = %fingerprint.digest,
            admitted,
            "Novelty check"
        );

        let admission = if admitted {
            Admission::Admitted
        } else {
            Admission::Rejected(RejectionReason::Duplicate)
        };

        Ok(ValidatedFinding {
            raw,
            credibility,
            fingerprint,
            novel: admitted,
            admission,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_pool;
    use crate::types::{OriginKind, SourceDescriptor};

    fn raw(locator: &str, origin: OriginKind, text: &str) -> RawFinding {
        RawFinding {
            project_id: "BT015".to_string(),
            source: SourceDescriptor::new(origin, locator),
            collector: "test".to_string(),
            title: None,
            text: text.to_string(),
            published_at: Some(Utc::now()),
            retrieved_at: Utc::now(),
        }
    }

    fn permit(text: &str) -> RawFinding {
        raw("https://www.maricopa.gov/permits/1", OriginKind::Permit, text)
    }

    #[tokio::test]
    async fn test_admits_then_rejects_duplicate() {
        let (_dir, pool) = test_pool().await;
        let validator = Validator::new(pool.clone(), 60, 1000);

        let first = validator
            .validate(permit("The county approved the construction permit in Feb 2024."), 1)
            .await
            .unwrap();
        assert!(first.is_admitted());
        assert!(first.novel);
        assert_eq!(first.credibility.score, 82);

        // Reworded, different locator: still the same normalized content
        let again = validator
            .validate(
                raw(
                    "https://www.maricopa.gov/news/2",
                    OriginKind::Permit,
                    "Construction permit approved by the county in Feb 2024",
                ),
                2,
            )
            .await
            .unwrap();
        assert_eq!(again.rejection(), Some(RejectionReason::Duplicate));
        assert!(!again.novel);
    }

    #[tokio::test]
    async fn test_low_credibility_does_not_record_fingerprint() {
        let (_dir, pool) = test_pool().await;
        let validator = Validator::new(pool.clone(), 60, 1000);

        let weak = RawFinding {
            published_at: None,
            ..raw("https://randomblog.io/post", OriginKind::News, "Plant might be delayed, click here")
        };
        let result = validator.validate(weak, 1).await.unwrap();

        assert_eq!(result.rejection(), Some(RejectionReason::LowCredibility));
        assert!(result.novel);
        assert_eq!(db::fingerprints::count_for_project(&pool, "BT015").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_same_locator_and_date_is_duplicate() {
        let (_dir, pool) = test_pool().await;
        let validator = Validator::new(pool.clone(), 60, 1000);

        let a = permit("Grading permit issued for the north parcel in 2024.");
        let b = permit("Updated notice: grading permit issued for the north parcel and parking structure.");

        assert!(validator.validate(a, 1).await.unwrap().is_admitted());
        assert_eq!(
            validator.validate(b, 1).await.unwrap().rejection(),
            Some(RejectionReason::Duplicate)
        );
    }

    #[tokio::test]
    async fn test_corroboration_requires_a_different_domain() {
        let (_dir, pool) = test_pool().await;
        let validator = Validator::new(pool, 60, 1000);

        let batch = vec![
            raw("https://www.reuters.com/a", OriginKind::News, "Battery plant construction delayed until 2026"),
            raw("https://www.utilitydive.com/b", OriginKind::News, "Construction of battery plant delayed to 2026"),
            raw("https://www.reuters.com/c", OriginKind::News, "Battery plant construction delayed until 2026, sources say"),
            raw("https://www.ft.com/d", OriginKind::News, "Hiring fair draws 400 applicants"),
        ];

        let candidates = validator.prepare(batch);

        assert_eq!(candidates[0].credibility.corroboration, credibility::CORROBORATION_BONUS);
        assert_eq!(candidates[1].credibility.corroboration, credibility::CORROBORATION_BONUS);
        assert_eq!(candidates[3].credibility.corroboration, 0.0);
    }
}
