//! Credibility scoring
//!
//! `score = 0.6 * authority + 0.25 * recency + 0.15 * quality + corroboration`,
//! rounded and clamped to 0-100.
//!
//! - **Authority:** known domains first, then `.gov`, then the origin-kind prior
//! - **Recency:** tiered by age of the publication date
//! - **Quality:** length, concrete data points, attribution, spam phrases
//! - **Corroboration:** flat bonus when an independent source in the same
//!   run reports similar content

use crate::types::{Credibility, CredibilityFlag, OriginKind, RawFinding, Recommendation};
use chrono::{DateTime, Utc};

const AUTHORITY_WEIGHT: f64 = 0.60;
const RECENCY_WEIGHT: f64 = 0.25;
const QUALITY_WEIGHT: f64 = 0.15;

/// Added when another domain reports similar content in the same run
pub const CORROBORATION_BONUS: f64 = 8.0;

/// Authority of known publishers, matched on the domain or any subdomain
const DOMAIN_AUTHORITY: &[(&str, f64)] = &[
    ("sec.gov", 90.0),
    ("commerce.gov", 85.0),
    ("energy.gov", 85.0),
    ("nist.gov", 85.0),
    ("epa.gov", 80.0),
    ("state.gov", 80.0),
    // Grid operators
    ("pjm.com", 85.0),
    ("ercot.com", 85.0),
    ("caiso.com", 85.0),
    ("misoenergy.org", 85.0),
    ("nyiso.com", 85.0),
    ("spp.org", 85.0),
    ("reuters.com", 75.0),
    ("wsj.com", 75.0),
    ("ft.com", 75.0),
    ("bloomberg.com", 75.0),
    // Trade press
    ("semianalysis.com", 70.0),
    ("datacenterdynamics.com", 70.0),
    ("utilitydive.com", 70.0),
    ("electrek.co", 65.0),
    ("theelec.co.kr", 65.0),
];

const GOV_AUTHORITY: f64 = 85.0;
const LOCAL_NEWS_AUTHORITY: f64 = 55.0;
const UNRECOGNISED_NEWS_AUTHORITY: f64 = 40.0;

const LOCAL_NEWS_INDICATORS: &[&str] = &[
    "gazette", "tribune", "herald", "times", "news", "post", "journal", "chronicle", "dispatch",
];

const DATA_INDICATORS: &[&str] = &[
    "$", "billion", "million", "percent", "%", "2024", "2025", "2026", "2027", "2028", "2029",
    "2030", "q1", "q2", "q3", "q4", "mw", "gw", "employees", "jobs", "workforce",
];

const SPAM_INDICATORS: &[&str] = &[
    "click here", "subscribe", "sign up", "limited time", "act now", "exclusive offer",
];

/// Word count below which content is flagged thin
const THIN_CONTENT_WORDS: usize = 20;

/// Prior for an origin kind when the publisher is not otherwise known
pub fn origin_prior(origin: OriginKind) -> f64 {
    match origin {
        OriginKind::Filing => 90.0,
        OriginKind::Permit | OriginKind::Government | OriginKind::GridQueue => 85.0,
        OriginKind::PressRelease => 70.0,
        OriginKind::News => 60.0,
        OriginKind::Unknown => 40.0,
    }
}

fn is_primary(origin: OriginKind) -> bool {
    matches!(
        origin,
        OriginKind::Filing | OriginKind::Permit | OriginKind::Government | OriginKind::GridQueue
    )
}

fn known_domain_authority(domain: &str) -> Option<f64> {
    DOMAIN_AUTHORITY.iter().find_map(|(known, score)| {
        let subdomain = domain
            .strip_suffix(known)
            .is_some_and(|prefix| prefix.ends_with('.'));
        (domain == *known || subdomain).then_some(*score)
    })
}

/// Authority of a source (0-100)
pub fn authority(origin: OriginKind, domain: &str, locator_is_url: bool) -> f64 {
    if let Some(score) = known_domain_authority(domain) {
        return score;
    }
    if domain.ends_with(".gov") {
        return GOV_AUTHORITY;
    }
    match origin {
        OriginKind::News | OriginKind::Unknown => {
            if LOCAL_NEWS_INDICATORS.iter().any(|i| domain.contains(i)) {
                LOCAL_NEWS_AUTHORITY
            } else if locator_is_url {
                UNRECOGNISED_NEWS_AUTHORITY
            } else {
                origin_prior(origin)
            }
        }
        other => origin_prior(other),
    }
}

/// Recency (0-100) from publication age; unknown dates score neutral
pub fn recency(published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(published_at) = published_at else {
        return 50.0;
    };
    match (now - published_at).num_days() {
        ..=1 => 100.0,
        2..=3 => 95.0,
        4..=7 => 90.0,
        8..=14 => 80.0,
        15..=30 => 70.0,
        31..=60 => 60.0,
        61..=90 => 50.0,
        _ => 40.0,
    }
}

/// Content quality (0-100) and whether spam phrases were seen
pub fn quality(text: &str) -> (f64, bool) {
    if text.trim().is_empty() {
        return (30.0, false);
    }
    let lower = text.to_lowercase();
    let mut score: f64 = 50.0;

    let words = text.split_whitespace().count();
    if words >= 100 {
        score += 15.0;
    } else if words >= 50 {
        score += 10.0;
    } else if words < THIN_CONTENT_WORDS {
        score -= 10.0;
    }

    let data_points = DATA_INDICATORS.iter().filter(|i| lower.contains(*i)).count();
    score += (data_points as f64 * 3.0).min(20.0);

    if text.contains('"') || lower.contains("said") || lower.contains("announced") {
        score += 10.0;
    }

    let spam = SPAM_INDICATORS.iter().filter(|i| lower.contains(*i)).count();
    score -= spam as f64 * 10.0;

    (score.clamp(0.0, 100.0), spam > 0)
}

pub fn recommendation(score: u8) -> Recommendation {
    match score {
        80.. => Recommendation::Approve,
        60..=79 => Recommendation::ApproveModerate,
        40..=59 => Recommendation::HoldForCorroboration,
        _ => Recommendation::Reject,
    }
}

/// Score one finding
pub fn assess(raw: &RawFinding, corroborated: bool, now: DateTime<Utc>) -> Credibility {
    let domain = raw.source.domain();
    let locator_is_url = raw.source.locator.starts_with("http://")
        || raw.source.locator.starts_with("https://");
    let text = raw.full_text();

    let authority = authority(raw.source.origin, &domain, locator_is_url);
    let recency = recency(raw.published_at, now);
    let (quality, spam) = quality(&text);
    let corroboration = if corroborated { CORROBORATION_BONUS } else { 0.0 };

    let raw_score = AUTHORITY_WEIGHT * authority
        + RECENCY_WEIGHT * recency
        + QUALITY_WEIGHT * quality
        + corroboration;
    let score = raw_score.round().clamp(0.0, 100.0) as u8;

    let mut flags = Vec::new();
    if is_primary(raw.source.origin) {
        flags.push(CredibilityFlag::PrimarySource);
    }
    if authority >= 85.0 {
        flags.push(CredibilityFlag::HighAuthoritySource);
    } else if authority < 60.0 {
        flags.push(CredibilityFlag::LowAuthoritySource);
    }
    match raw.published_at {
        None => flags.push(CredibilityFlag::UnknownPublicationDate),
        Some(_) if recency >= 90.0 => flags.push(CredibilityFlag::VeryRecent),
        Some(_) if recency < 50.0 => flags.push(CredibilityFlag::StaleData),
        Some(_) => {}
    }
    if corroborated {
        flags.push(CredibilityFlag::Corroborated);
    }
    if text.split_whitespace().count() < THIN_CONTENT_WORDS {
        flags.push(CredibilityFlag::ThinContent);
    }
    if spam {
        flags.push(CredibilityFlag::SpamIndicators);
    }

    Credibility {
        score,
        authority,
        recency,
        quality,
        corroboration,
        flags,
        recommendation: recommendation(score),
    }
}
