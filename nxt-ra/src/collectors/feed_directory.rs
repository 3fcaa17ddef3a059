//! Curated feed drops
//!
//! Findings placed on disk under `<root>/feeds/<project_id>/*.json`: exports
//! from grant portals, interconnection queues, permit notices and the like.
//! Each file holds one entry or an array of entries; the entry declares its
//! own origin kind.

use crate::types::{
    CollectRequest, CollectorError, FindingStream, OriginKind, RawFinding, SourceCollector,
    SourceDescriptor,
};
use chrono::{DateTime, NaiveDate, Utc};
use nxt_common::db::Project;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One entry of a feed file
#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(default = "default_origin")]
    origin: OriginKind,
    #[serde(default)]
    publisher: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    text: String,
    /// `YYYY-MM-DD` or RFC 3339
    #[serde(default)]
    published: Option<String>,
}

fn default_origin() -> OriginKind {
    OriginKind::Unknown
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedFile {
    Many(Vec<FeedEntry>),
    One(FeedEntry),
}

fn parse_published(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub struct FeedDirectoryCollector {
    feeds_dir: PathBuf,
}

impl FeedDirectoryCollector {
    pub fn new(feeds_dir: impl Into<PathBuf>) -> Self {
        Self {
            feeds_dir: feeds_dir.into(),
        }
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.feeds_dir.join(project_id)
    }

    /// JSON files in a project's drop directory, sorted by name
    async fn feed_files(dir: &Path) -> Result<Vec<PathBuf>, CollectorError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| CollectorError::SourceUnavailable(format!("{}: {}", dir.display(), e)))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CollectorError::SourceUnavailable(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl SourceCollector for FeedDirectoryCollector {
    fn name(&self) -> &'static str {
        "feed_directory"
    }

    fn origin(&self) -> OriginKind {
        OriginKind::Unknown
    }

    fn applies_to(&self, project: &Project) -> bool {
        self.project_dir(&project.id).is_dir()
    }

    fn collect<'a>(&'a self, req: &'a CollectRequest) -> FindingStream<'a> {
        Box::pin(async_stream::try_stream! {
            let project_id = req.project.id.clone();
            let dir = self.project_dir(&project_id);

            for path in Self::feed_files(&dir).await? {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| CollectorError::SourceUnavailable(format!("{}: {}", path.display(), e)))?;

                let entries = match serde_json::from_str::<FeedFile>(&content)
                    .map_err(|e| CollectorError::SourceMalformed(format!("{}: {}", path.display(), e)))?
                {
                    FeedFile::Many(entries) => entries,
                    FeedFile::One(entry) => vec![entry],
                };

                for (index, entry) in entries.into_iter().enumerate() {
                    if entry.text.trim().is_empty() {
                        continue;
                    }
                    let locator = entry
                        .url
                        .clone()
                        .unwrap_or_else(|| format!("{}#{}", path.display(), index));
                    let mut source = SourceDescriptor::new(entry.origin, locator);
                    source.publisher = entry.publisher;

                    yield RawFinding {
                        project_id: project_id.clone(),
                        source,
                        collector: "feed_directory".to_string(),
                        title: entry.title,
                        text: entry.text,
                        published_at: entry.published.as_deref().and_then(parse_published),
                        retrieved_at: Utc::now(),
                    };
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_project;
    use futures::StreamExt;
    use tempfile::TempDir;

    fn request(project_id: &str) -> CollectRequest {
        CollectRequest {
            project: sample_project(project_id),
            since: Utc::now() - chrono::Duration::days(7),
            max_findings: 20,
        }
    }

    async fn collect(collector: &FeedDirectoryCollector, req: &CollectRequest) -> Vec<Result<RawFinding, CollectorError>> {
        collector.collect(req).collect().await
    }

    #[tokio::test]
    async fn test_reads_single_and_array_files() {
        let dir = TempDir::new().unwrap();
        let project_dir = dir.path().join("BT015");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(
            project_dir.join("a.json"),
            r#"{"origin":"permit","publisher":"Maricopa County","title":"Construction permit approved",
                "text":"The county approved the construction permit in Feb 2024.","published":"2024-02-12"}"#,
        )
        .unwrap();
        std::fs::write(
            project_dir.join("b.json"),
            r#"[{"origin":"grid_queue","url":"https://www.pjm.com/queue/AE2-123","text":"Queue position AE2-123 entered facilities study."}]"#,
        )
        .unwrap();

        let collector = FeedDirectoryCollector::new(dir.path());
        let req = request("BT015");
        assert!(collector.applies_to(&req.project));

        let findings: Vec<RawFinding> = collect(&collector, &req)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].source.origin, OriginKind::Permit);
        assert_eq!(findings[0].source.domain(), "maricopa county");
        assert_eq!(
            findings[0].published_at.unwrap().date_naive(),
            NaiveDate::from_ymd_opt(2024, 2, 12).unwrap()
        );
        assert_eq!(findings[1].source.domain(), "pjm.com");
    }

    #[tokio::test]
    async fn test_malformed_file_is_source_malformed() {
        let dir = TempDir::new().unwrap();
        let project_dir = dir.path().join("BT015");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("broken.json"), "{ not json").unwrap();

        let collector = FeedDirectoryCollector::new(dir.path());
        let results = collect(&collector, &request("BT015")).await;

        assert!(matches!(results[0], Err(CollectorError::SourceMalformed(_))));
    }

    #[tokio::test]
    async fn test_project_without_directory_does_not_apply() {
        let dir = TempDir::new().unwrap();
        let collector = FeedDirectoryCollector::new(dir.path());
        assert!(!collector.applies_to(&sample_project("SC002")));
    }

    #[tokio::test]
    async fn test_empty_directory_yields_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("BT015")).unwrap();

        let collector = FeedDirectoryCollector::new(dir.path());
        assert!(collect(&collector, &request("BT015")).await.is_empty());
    }
}
