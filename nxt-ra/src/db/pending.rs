//! Admitted findings awaiting analysis or update
//!
//! A finding is parked here when its fingerprint is recorded but it never
//! reached a decision (analysis timeout, persistence conflict, cancellation).
//! The next run for the project replays it before new findings.

use crate::types::ValidatedFinding;
use chrono::Utc;
use nxt_common::Result;
use sqlx::{Executor, Row, Sqlite};

/// Park a finding; a second deferral of the same digest bumps `attempts`
pub async fn defer<'e, E>(
    executor: E,
    finding: &ValidatedFinding,
    reason: &str,
    run_id: i64,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO pending_findings (project_id, digest, payload, reason, run_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, digest) DO UPDATE SET
            reason = excluded.reason,
            run_id = excluded.run_id,
            attempts = attempts + 1
        "#,
    )
    .bind(&finding.raw.project_id)
    .bind(&finding.fingerprint.digest)
    .bind(serde_json::to_string(finding)?)
    .bind(reason)
    .bind(run_id)
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Parked findings for a project, oldest first
pub async fn list_for_project<'e, E>(executor: E, project_id: &str) -> Result<Vec<ValidatedFinding>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT payload FROM pending_findings WHERE project_id = ? ORDER BY created_at, digest",
    )
    .bind(project_id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            let payload: String = row.try_get("payload")?;
            Ok(serde_json::from_str(&payload)?)
        })
        .collect()
}

/// Drop a finding once it reached a decision
pub async fn resolve<'e, E>(executor: E, project_id: &str, digest: &str) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM pending_findings WHERE project_id = ? AND digest = ?")
        .bind(project_id)
        .bind(digest)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn count<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_findings")
        .fetch_one(executor)
        .await?;
    Ok(count)
}
