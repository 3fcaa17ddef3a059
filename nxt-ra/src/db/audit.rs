//! Audit log queries
//!
//! The table is append-only (enforced by triggers); there is no update or
//! delete here.

use super::parse_timestamp;
use chrono::Utc;
use nxt_common::db::{AuditLogEntry, Outcome, Stage};
use nxt_common::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

/// Entry about to be appended
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub run_id: i64,
    pub stage: Stage,
    pub project_id: String,
    pub outcome: Outcome,
    pub reason: String,
    pub detail: Option<serde_json::Value>,
    pub fingerprint: Option<String>,
}

impl NewAuditEntry {
    pub fn new(
        run_id: i64,
        stage: Stage,
        project_id: impl Into<String>,
        outcome: Outcome,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            stage,
            project_id: project_id.into(),
            outcome,
            reason: reason.into(),
            detail: None,
            fingerprint: None,
        }
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn fingerprint(mut self, digest: impl Into<String>) -> Self {
        self.fingerprint = Some(digest.into());
        self
    }
}

/// Append an entry; returns its id
pub async fn append<'e, E>(executor: E, entry: &NewAuditEntry) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let detail = entry
        .detail
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO audit_log
            (run_id, stage, project_id, outcome, reason, detail, fingerprint, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.run_id)
    .bind(entry.stage.as_str())
    .bind(&entry.project_id)
    .bind(entry.outcome.as_str())
    .bind(&entry.reason)
    .bind(detail)
    .bind(&entry.fingerprint)
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

const SELECT_ENTRY: &str = r#"
    SELECT id, run_id, stage, project_id, outcome, reason, detail, fingerprint, created_at
    FROM audit_log
"#;

fn row_to_entry(row: &SqliteRow) -> Result<AuditLogEntry> {
    let stage: String = row.try_get("stage")?;
    let outcome: String = row.try_get("outcome")?;
    let detail: Option<String> = row.try_get("detail")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(AuditLogEntry {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        stage: Stage::parse(&stage)?,
        project_id: row.try_get("project_id")?,
        outcome: Outcome::parse(&outcome)?,
        reason: row.try_get("reason")?,
        detail: detail.map(|d| serde_json::from_str(&d)).transpose()?,
        fingerprint: row.try_get("fingerprint")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

pub async fn list_for_run<'e, E>(executor: E, run_id: i64) -> Result<Vec<AuditLogEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE run_id = ? ORDER BY id", SELECT_ENTRY);
    let rows = sqlx::query(&sql).bind(run_id).fetch_all(executor).await?;
    rows.iter().map(row_to_entry).collect()
}

pub async fn list_for_project<'e, E>(executor: E, project_id: &str) -> Result<Vec<AuditLogEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE project_id = ? ORDER BY id", SELECT_ENTRY);
    let rows = sqlx::query(&sql).bind(project_id).fetch_all(executor).await?;
    rows.iter().map(row_to_entry).collect()
}

/// Per (stage, outcome, reason) count for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeCount {
    pub stage: String,
    pub outcome: String,
    pub reason: String,
    pub count: i64,
}

pub async fn outcome_counts<'e, E>(executor: E, run_id: i64) -> Result<Vec<OutcomeCount>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT stage, outcome, reason, COUNT(*) AS count
        FROM audit_log WHERE run_id = ?
        GROUP BY stage, outcome, reason
        ORDER BY stage, outcome, reason
        "#,
    )
    .bind(run_id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(OutcomeCount {
                stage: row.try_get("stage")?,
                outcome: row.try_get("outcome")?,
                reason: row.try_get("reason")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}
