//! Research run bookkeeping
//!
//! Run ids come from an AUTOINCREMENT key, so they increase monotonically and
//! are never reused.

use super::parse_timestamp;
use chrono::Utc;
use nxt_common::db::{ResearchRun, RunStatus};
use nxt_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

/// Open a new run; returns its id
pub async fn start_run<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("INSERT INTO research_runs (status, started_at) VALUES (?, ?)")
        .bind(RunStatus::Running.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(executor)
        .await?;

    Ok(result.last_insert_rowid())
}

/// Close a run with its final status and summary
pub async fn finish_run<'e, E>(
    executor: E,
    run_id: i64,
    status: RunStatus,
    summary: &serde_json::Value,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE research_runs SET status = ?, finished_at = ?, summary = ? WHERE run_id = ?",
    )
    .bind(status.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(serde_json::to_string(summary)?)
    .bind(run_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Mark runs left `running` by a previous process as failed
pub async fn fail_interrupted_runs<'e, E>(executor: E) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE research_runs SET status = ?, finished_at = ? WHERE status = ?",
    )
    .bind(RunStatus::Failed.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(RunStatus::Running.as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

fn row_to_run(row: &SqliteRow) -> Result<ResearchRun> {
    let status: String = row.try_get("status")?;
    let started_at: String = row.try_get("started_at")?;
    let finished_at: Option<String> = row.try_get("finished_at")?;
    let summary: Option<String> = row.try_get("summary")?;

    Ok(ResearchRun {
        run_id: row.try_get("run_id")?,
        status: RunStatus::parse(&status)?,
        started_at: parse_timestamp(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
        summary: summary.map(|s| serde_json::from_str(&s)).transpose()?,
    })
}

pub async fn get_run<'e, E>(executor: E, run_id: i64) -> Result<Option<ResearchRun>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT run_id, status, started_at, finished_at, summary FROM research_runs WHERE run_id = ?",
    )
    .bind(run_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_run).transpose()
}

/// Most recent runs first
pub async fn list_recent<'e, E>(executor: E, limit: i64) -> Result<Vec<ResearchRun>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT run_id, status, started_at, finished_at, summary
        FROM research_runs ORDER BY run_id DESC LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(executor)
    .await?;

    rows.iter().map(row_to_run).collect()
}
