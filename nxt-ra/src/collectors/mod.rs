//! Source collectors
//!
//! Each collector turns a project into zero or more `RawFinding`s from one
//! origin. `ParallelCollector` runs every applicable collector for a project
//! concurrently, bounding each fetch attempt with a timeout and retrying
//! `SourceUnavailable` with exponential backoff up to a fixed cap. A failing
//! collector only affects its own report.

pub mod feed_directory;
pub mod news_search;
pub mod sec_filings;

pub use feed_directory::FeedDirectoryCollector;
pub use news_search::NewsSearchCollector;
pub use sec_filings::SecFilingsCollector;

use crate::config::Settings;
use crate::types::{CollectRequest, CollectorError, RawFinding, SourceCollector};
use crate::utils::Backoff;
use futures::future::join_all;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout and retry policy applied to every collector
#[derive(Debug, Clone, Copy)]
pub struct CollectorPolicy {
    /// Bound on one fetch attempt (draining the whole stream)
    pub timeout: Duration,
    /// Retries after the first attempt, for `SourceUnavailable` only
    pub retry_cap: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl CollectorPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.collector_timeout(),
            retry_cap: settings.collector_retry_cap,
            ..Self::default()
        }
    }
}

impl Default for CollectorPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_cap: 3,
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
        }
    }
}

/// Outcome of one collector for one project
#[derive(Debug, Clone)]
pub struct CollectorReport {
    pub collector: &'static str,
    pub attempts: u32,
    pub outcome: Result<Vec<RawFinding>, CollectorError>,
    /// Error that ended the stream after some findings were read
    pub interrupted: Option<CollectorError>,
}

impl CollectorReport {
    pub fn findings(&self) -> &[RawFinding] {
        match &self.outcome {
            Ok(findings) => findings,
            Err(_) => &[],
        }
    }
}

/// Runs a set of collectors concurrently for one project
pub struct ParallelCollector {
    collectors: Vec<Arc<dyn SourceCollector>>,
    policy: CollectorPolicy,
}

impl ParallelCollector {
    pub fn new(collectors: Vec<Arc<dyn SourceCollector>>, policy: CollectorPolicy) -> Self {
        Self { collectors, policy }
    }

    /// Build the collectors enabled in `settings`
    pub fn from_settings(settings: &Settings, root_folder: &std::path::Path) -> nxt_common::Result<Self> {
        let mut collectors: Vec<Arc<dyn SourceCollector>> = Vec::new();
        if settings.enable_feeds {
            collectors.push(Arc::new(FeedDirectoryCollector::new(
                nxt_common::config::feeds_dir(root_folder),
            )));
        }
        if settings.enable_sec {
            collectors.push(Arc::new(SecFilingsCollector::new(
                &settings.sec_user_agent,
                settings.collector_timeout(),
            )?));
        }
        if settings.enable_news {
            collectors.push(Arc::new(NewsSearchCollector::new(settings.collector_timeout())?));
        }

        info!(
            collectors = collectors.len(),
            names = ?collectors.iter().map(|c| c.name()).collect::<Vec<_>>(),
            "Collectors configured"
        );

        Ok(Self::new(collectors, CollectorPolicy::from_settings(settings)))
    }

    pub fn count(&self) -> usize {
        self.collectors.len()
    }

    /// Run every applicable collector to completion
    ///
    /// Returns one report per collector that applies to the project, in
    /// registration order.
    pub async fn collect_all(&self, request: &CollectRequest) -> Vec<CollectorReport> {
        let runs = self
            .collectors
            .iter()
            .filter(|c| c.applies_to(&request.project))
            .map(|collector| self.run_with_retry(collector.as_ref(), request));

        join_all(runs).await
    }

    async fn run_with_retry(
        &self,
        collector: &dyn SourceCollector,
        request: &CollectRequest,
    ) -> CollectorReport {
        let name = collector.name();
        let project_id = request.project.id.as_str();
        let mut backoff = Backoff::new(self.policy.backoff_initial, self.policy.backoff_max);
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let drained = match tokio::time::timeout(self.policy.timeout, drain(collector, request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CollectorError::SourceUnavailable(format!(
                    "timed out after {}s",
                    self.policy.timeout.as_secs_f64()
                ))),
            };

            match drained {
                Err(e) if e.is_transient() && attempts <= self.policy.retry_cap => {
                    let delay = backoff.next_delay();
                    warn!(
                        collector = name,
                        project_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Collector unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(Drained { findings, interrupted }) => {
                    debug!(collector = name, project_id, count = findings.len(), "Collector finished");
                    return CollectorReport {
                        collector: name,
                        attempts,
                        outcome: Ok(findings),
                        interrupted,
                    };
                }
                Err(e) => {
                    if e != CollectorError::SourceEmpty {
                        warn!(collector = name, project_id, attempts, error = %e, "Collector failed");
                    }
                    return CollectorReport {
                        collector: name,
                        attempts,
                        outcome: Err(e),
                        interrupted: None,
                    };
                }
            }
        }
    }
}

/// Findings read from one stream and the error that cut it short, if any
struct Drained {
    findings: Vec<RawFinding>,
    interrupted: Option<CollectorError>,
}

/// Drain a collector's stream, stopping at `max_findings`.
///
/// An error before the first finding fails the attempt; an error after some
/// findings ends the stream and keeps what was read.
async fn drain(collector: &dyn SourceCollector, request: &CollectRequest) -> Result<Drained, CollectorError> {
    let mut stream = collector.collect(request);
    let mut findings = Vec::new();
    let mut interrupted = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(finding) => {
                findings.push(finding);
                if findings.len() >= request.max_findings {
                    break;
                }
            }
            Err(e) if findings.is_empty() => return Err(e),
            Err(e) => {
                warn!(
                    collector = collector.name(),
                    project_id = %request.project.id,
                    kept = findings.len(),
                    error = %e,
                    "Collector stream ended early"
                );
                interrupted = Some(e);
                break;
            }
        }
    }

    if findings.is_empty() {
        Err(CollectorError::SourceEmpty)
    } else {
        Ok(Drained { findings, interrupted })
    }
}

/// Build the `User-Agent`-bearing client shared by HTTP collectors
pub(crate) fn http_client(user_agent: &str, timeout: Duration) -> nxt_common::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent.to_string())
        .build()
        .map_err(|e| nxt_common::Error::Internal(format!("HTTP client: {}", e)))
}
