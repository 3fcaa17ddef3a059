//! News search collector (GDELT DOC 2.0)
//!
//! Searches worldwide English-language news for each of the project's
//! research keywords (or its name when it has none). GDELT returns headlines
//! only, so findings from here are short and score lower than filings.
//!
//! API: https://api.gdeltproject.org/api/v2/doc/doc

use super::http_client;
use crate::types::{
    CollectRequest, CollectorError, FindingStream, OriginKind, RawFinding, SourceCollector,
    SourceDescriptor,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use governor::{Quota, RateLimiter};
use nxt_common::db::Project;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// GDELT asks for no more than one query per second
const REQUESTS_PER_SECOND: u32 = 1;

/// GDELT's `maxrecords` ceiling
const MAX_RECORDS: usize = 250;

/// Keywords searched per project per run
const MAX_KEYWORDS: usize = 3;

#[derive(Debug, Default, Deserialize)]
struct ArticleList {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    url: String,
    #[serde(default)]
    title: String,
    /// `20240301T120000Z`
    #[serde(default)]
    seendate: Option<String>,
    #[serde(default)]
    domain: Option<String>,
}

pub struct NewsSearchCollector {
    client: Client,
    base_url: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl NewsSearchCollector {
    pub fn new(timeout: Duration) -> nxt_common::Result<Self> {
        let user_agent = format!("nxt-ra/{}", env!("CARGO_PKG_VERSION"));
        let rate_limiter = RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN),
        ));

        Ok(Self {
            client: http_client(&user_agent, timeout)?,
            base_url: "https://api.gdeltproject.org/api/v2/doc/doc".to_string(),
            rate_limiter,
        })
    }

    async fn search(&self, query: &str, since: DateTime<Utc>, max: usize) -> Result<String, CollectorError> {
        self.rate_limiter.until_ready().await;

        let start = since.format("%Y%m%d%H%M%S").to_string();
        let max_records = max.clamp(1, MAX_RECORDS).to_string();
        debug!(query, since = %start, "Querying GDELT");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("query", query),
                ("mode", "artlist"),
                ("format", "json"),
                ("maxrecords", max_records.as_str()),
                ("startdatetime", start.as_str()),
                ("sort", "datedesc"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::SourceUnavailable(format!("GDELT returned {}", status)));
        }

        Ok(response.text().await?)
    }
}

/// One query per research keyword, falling back to the project name
fn build_queries(project: &Project) -> Vec<String> {
    let mut terms: Vec<&str> = project
        .research_keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| k.len() > 3)
        .take(MAX_KEYWORDS)
        .collect();
    if terms.is_empty() {
        terms.push(project.name.trim());
    }

    terms
        .into_iter()
        .map(|t| format!("\"{}\" sourcelang:english", t.replace('"', "")))
        .collect()
}

fn parse_seendate(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ")
        .ok()
        .map(|dt| dt.and_utc())
}

fn parse_articles(body: &str, project_id: &str) -> Result<Vec<RawFinding>, CollectorError> {
    // GDELT answers query errors with a plain-text 200
    let list: ArticleList = serde_json::from_str(body).map_err(|_| {
        let preview: String = body.chars().take(120).collect();
        CollectorError::SourceMalformed(format!("GDELT response: {}", preview.trim()))
    })?;

    let retrieved_at = Utc::now();
    Ok(list
        .articles
        .into_iter()
        .filter(|a| !a.title.trim().is_empty())
        .map(|article| {
            let mut source = SourceDescriptor::new(OriginKind::News, article.url);
            source.publisher = article.domain;
            RawFinding {
                project_id: project_id.to_string(),
                source,
                collector: "news_search".to_string(),
                title: None,
                text: article.title.trim().to_string(),
                published_at: article.seendate.as_deref().and_then(parse_seendate),
                retrieved_at,
            }
        })
        .collect())
}

impl SourceCollector for NewsSearchCollector {
    fn name(&self) -> &'static str {
        "news_search"
    }

    fn origin(&self) -> OriginKind {
        OriginKind::News
    }

    fn collect<'a>(&'a self, req: &'a CollectRequest) -> FindingStream<'a> {
        Box::pin(async_stream::try_stream! {
            let mut seen = HashSet::new();
            for query in build_queries(&req.project) {
                let body = self.search(&query, req.since, req.max_findings).await?;
                for finding in parse_articles(&body, &req.project.id)? {
                    if seen.insert(finding.source.locator.clone()) {
                        yield finding;
                    }
                }
            }
        })
    }
}
