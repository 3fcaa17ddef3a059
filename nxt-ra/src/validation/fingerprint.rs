//! Content fingerprints
//!
//! The digest is computed over a normalized token set rather than raw text:
//! lowercased, punctuation stripped, stopwords dropped, light suffix
//! stemming, then sorted and deduplicated. Restatements that differ only in
//! whitespace, word order, tense or filler words share a fingerprint.

use crate::types::Fingerprint;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "also", "an", "and", "any", "are", "as", "at", "be", "been", "being",
    "but", "by", "can", "did", "do", "does", "for", "from", "had", "has", "have", "he", "her",
    "his", "however", "if", "in", "into", "is", "it", "its", "itself", "more", "most", "new",
    "not", "now", "of", "on", "or", "our", "over", "said", "says", "she", "so", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "to", "under",
    "up", "upon", "very", "was", "we", "were", "which", "while", "who", "will", "with", "would",
];

/// Suffixes stripped by `stem`, longest first
const SUFFIXES: &[&str] = &["ing", "ed", "es", "s"];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.binary_search(&token).is_ok()
}

/// Strip one inflectional suffix, keeping at least a 3-letter stem.
/// Numbers pass through unchanged.
fn stem(token: &str) -> &str {
    if token.chars().any(|c| c.is_ascii_digit()) {
        return token;
    }
    for suffix in SUFFIXES {
        if let Some(stem) = token.strip_suffix(suffix) {
            if stem.len() >= 3 && !stem.ends_with('s') {
                return stem;
            }
        }
    }
    token
}

/// Normalized, deduplicated token set of `text`
pub fn normalized_tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !is_stopword(t))
        .map(|t| stem(t).to_string())
        .filter(|t| t.len() > 1 || t.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

/// Fingerprint of a finding's text for one project
pub fn compute(project_id: &str, text: &str) -> Fingerprint {
    let summary = normalized_tokens(text)
        .into_iter()
        .collect::<Vec<_>>()
        .join(" ");

    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(summary.as_bytes());

    Fingerprint {
        digest: format!("{:x}", hasher.finalize()),
        summary,
    }
}

/// Jaccard similarity of two token sets; 0.0 when both are empty
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
