//! SEC EDGAR full-text search collector
//!
//! Queries the EDGAR full-text search index for recent 8-K, 10-Q and 10-K
//! filings mentioning the project's company ticker. Only projects with a
//! ticker are covered.
//!
//! API: https://efts.sec.gov/LATEST/search-index

use super::http_client;
use crate::types::{
    CollectRequest, CollectorError, FindingStream, OriginKind, RawFinding, SourceCollector,
    SourceDescriptor,
};
use chrono::{NaiveDate, Utc};
use governor::{Quota, RateLimiter};
use nxt_common::db::Project;
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// Forms searched, most material first
const FORMS: [&str; 3] = ["8-K", "10-Q", "10-K"];

/// Hits kept per form
const HITS_PER_FORM: usize = 5;

/// Longest filing excerpt carried into a finding
const EXCERPT_CHARS: usize = 1000;

/// Half of the 10 requests/second SEC fair-access ceiling
const REQUESTS_PER_SECOND: u32 = 5;

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: SearchHits,
}

#[derive(Debug, Default, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: FilingSource,
}

#[derive(Debug, Deserialize)]
struct FilingSource {
    #[serde(default)]
    display_names: Vec<String>,
    #[serde(default)]
    file_date: Option<String>,
    #[serde(default)]
    ciks: Vec<String>,
    /// Accession number, `0000950170-24-012345`
    #[serde(default)]
    adsh: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

pub struct SecFilingsCollector {
    client: Client,
    base_url: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl SecFilingsCollector {
    /// `user_agent` must carry a contact address per SEC policy
    pub fn new(user_agent: &str, timeout: Duration) -> nxt_common::Result<Self> {
        let rate_limiter = RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN),
        ));

        Ok(Self {
            client: http_client(user_agent, timeout)?,
            base_url: "https://efts.sec.gov/LATEST/search-index".to_string(),
            rate_limiter,
        })
    }

    async fn search(
        &self,
        ticker: &str,
        form: &str,
        since: NaiveDate,
    ) -> Result<String, CollectorError> {
        self.rate_limiter.until_ready().await;

        let startdt = since.format("%Y-%m-%d").to_string();
        debug!(ticker, form, since = %startdt, "Querying EDGAR full-text search");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", ticker),
                ("dateRange", "custom"),
                ("startdt", startdt.as_str()),
                ("forms", form),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::SourceUnavailable(format!(
                "EDGAR search returned {} for {} {}",
                status, ticker, form
            )));
        }

        Ok(response.text().await?)
    }
}

/// Turn one search response body into findings, newest hits first as returned
fn parse_search_response(
    body: &str,
    form: &str,
    project_id: &str,
    since: NaiveDate,
) -> Result<Vec<RawFinding>, CollectorError> {
    let parsed: SearchResponse = serde_json::from_str(body)
        .map_err(|e| CollectorError::SourceMalformed(format!("EDGAR {} response: {}", form, e)))?;

    let retrieved_at = Utc::now();
    let findings = parsed
        .hits
        .hits
        .into_iter()
        .filter_map(|hit| {
            let source = hit.source;
            let filed = source
                .file_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
            if filed.is_some_and(|d| d < since) {
                return None;
            }

            let company = source
                .display_names
                .first()
                .cloned()
                .unwrap_or_else(|| "Unknown filer".to_string());
            let cik = source.ciks.first()?.trim_start_matches('0').to_string();
            let locator = match &source.adsh {
                Some(adsh) => format!(
                    "https://www.sec.gov/Archives/edgar/data/{}/{}/",
                    cik,
                    adsh.replace('-', "")
                ),
                None => format!("https://www.sec.gov/Archives/edgar/data/{}", cik),
            };

            let title = format!("{} filed {}", company, form);
            let mut text = match filed {
                Some(d) => format!("{} filed a Form {} on {}.", company, form, d),
                None => format!("{} filed a Form {}.", company, form),
            };
            if let Some(excerpt) = source.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                text.push(' ');
                text.extend(excerpt.chars().take(EXCERPT_CHARS));
            }

            Some(RawFinding {
                project_id: project_id.to_string(),
                source: SourceDescriptor::new(OriginKind::Filing, locator).with_publisher("SEC EDGAR"),
                collector: "sec_filings".to_string(),
                title: Some(title),
                text,
                published_at: filed
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc()),
                retrieved_at,
            })
        })
        .take(HITS_PER_FORM)
        .collect();

    Ok(findings)
}

fn ticker_of(project: &Project) -> Option<&str> {
    project
        .company_ticker
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl SourceCollector for SecFilingsCollector {
    fn name(&self) -> &'static str {
        "sec_filings"
    }

    fn origin(&self) -> OriginKind {
        OriginKind::Filing
    }

    fn applies_to(&self, project: &Project) -> bool {
        ticker_of(project).is_some()
    }

    fn collect<'a>(&'a self, req: &'a CollectRequest) -> FindingStream<'a> {
        Box::pin(async_stream::try_stream! {
            let ticker = ticker_of(&req.project).unwrap_or_default().to_string();
            let since = req.since.date_naive();

            for form in FORMS {
                let body = self.search(&ticker, form, since).await?;
                for finding in parse_search_response(&body, form, &req.project.id, since)? {
                    yield finding;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "hits": {
            "total": {"value": 3},
            "hits": [
                {"_id": "0000950170-24-012345:ex99.htm",
                 "_source": {
                    "display_names": ["Intel Corp  (INTC)  (CIK 0000050863)"],
                    "file_date": "2024-03-04",
                    "ciks": ["0000050863"],
                    "adsh": "0000950170-24-012345",
                    "text": "The Company announced that first production at the Ohio fab is now expected in 2027."
                 }},
                {"_id": "b",
                 "_source": {
                    "display_names": ["Intel Corp  (INTC)  (CIK 0000050863)"],
                    "file_date": "2023-12-01",
                    "ciks": ["0000050863"]
                 }},
                {"_id": "c",
                 "_source": {"display_names": [], "file_date": "2024-03-05", "ciks": []}}
            ]
        }
    }"#;

    fn since() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 26).unwrap()
    }

    #[test]
    fn test_parses_recent_hits_only() {
        let findings = parse_search_response(SAMPLE, "8-K", "SC001", since()).unwrap();

        // One hit predates the window, one has no CIK to locate it
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.source.origin, OriginKind::Filing);
        assert_eq!(
            f.source.locator,
            "https://www.sec.gov/Archives/edgar/data/50863/000095017024012345/"
        );
        assert_eq!(f.source.domain(), "sec.gov");
        assert!(f.text.contains("Form 8-K on 2024-03-04"));
        assert!(f.text.contains("expected in 2027"));
        assert_eq!(f.published_at.unwrap().date_naive(), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
    }

    #[test]
    fn test_empty_object_yields_no_findings() {
        let findings = parse_search_response("{}", "10-Q", "SC001", since()).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_non_json_is_malformed() {
        let result = parse_search_response("<html>Rate limited</html>", "10-K", "SC001", since());
        assert!(matches!(result, Err(CollectorError::SourceMalformed(_))));
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let long = "x".repeat(5000);
        let body = format!(
            r#"{{"hits":{{"hits":[{{"_source":{{"file_date":"2024-03-01","ciks":["1"],"text":"{}"}}}}]}}}}"#,
            long
        );
        let findings = parse_search_response(&body, "8-K", "SC001", since()).unwrap();
        assert!(findings[0].text.len() <= EXCERPT_CHARS + 80);
    }

    #[test]
    fn test_only_projects_with_ticker_apply() {
        let collector = SecFilingsCollector::new("test agent test@example.com", Duration::from_secs(1)).unwrap();
        let mut project = crate::test_support::sample_project("SC001");
        project.company_ticker = Some("INTC".to_string());
        assert!(collector.applies_to(&project));

        project.company_ticker = Some("  ".to_string());
        assert!(!collector.applies_to(&project));
        project.company_ticker = None;
        assert!(!collector.applies_to(&project));
    }
}
