//! Velocity score and adjustment ledger queries

use super::{parse_string_list, parse_timestamp};
use chrono::Utc;
use nxt_common::db::{HealthStatus, Trend, VelocityAdjustment, VelocityScore};
use nxt_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

fn row_to_score(row: &SqliteRow) -> Result<VelocityScore> {
    let trend: String = row.try_get("trend")?;
    let health: String = row.try_get("health")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(VelocityScore {
        project_id: row.try_get("project_id")?,
        score: row.try_get("score")?,
        risk_adjusted: row.try_get("risk_adjusted")?,
        trend: Trend::parse(&trend)?,
        health: HealthStatus::parse(&health)?,
        previous_score: row.try_get("previous_score")?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub async fn get_score<'e, E>(executor: E, project_id: &str) -> Result<Option<VelocityScore>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT project_id, score, risk_adjusted, trend, health, previous_score, updated_at
        FROM velocity_scores WHERE project_id = ?
        "#,
    )
    .bind(project_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_score).transpose()
}

pub async fn list_scores<'e, E>(executor: E) -> Result<Vec<VelocityScore>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT project_id, score, risk_adjusted, trend, health, previous_score, updated_at
        FROM velocity_scores ORDER BY project_id
        "#,
    )
    .fetch_all(executor)
    .await?;

    rows.iter().map(row_to_score).collect()
}

/// Replace the stored score for a project
pub async fn upsert_score<'e, E>(executor: E, score: &VelocityScore) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO velocity_scores
            (project_id, score, risk_adjusted, trend, health, previous_score, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id) DO UPDATE SET
            score = excluded.score,
            risk_adjusted = excluded.risk_adjusted,
            trend = excluded.trend,
            health = excluded.health,
            previous_score = excluded.previous_score,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&score.project_id)
    .bind(score.score)
    .bind(score.risk_adjusted)
    .bind(score.trend.as_str())
    .bind(score.health.as_str())
    .bind(score.previous_score)
    .bind(score.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Fields of a ledger entry about to be appended
#[derive(Debug, Clone)]
pub struct NewAdjustment<'a> {
    pub project_id: &'a str,
    pub run_id: i64,
    pub delta: f64,
    pub justification: &'a str,
    pub related_items: &'a [String],
    pub fingerprint: &'a str,
    pub audit_entry_id: i64,
}

pub async fn insert_adjustment<'e, E>(executor: E, adj: &NewAdjustment<'_>) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO velocity_adjustments
            (project_id, run_id, delta, justification, related_items, fingerprint,
             audit_entry_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(adj.project_id)
    .bind(adj.run_id)
    .bind(adj.delta)
    .bind(adj.justification)
    .bind(serde_json::to_string(adj.related_items)?)
    .bind(adj.fingerprint)
    .bind(adj.audit_entry_id)
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Sum of all applied adjustments for a project
pub async fn adjustments_total<'e, E>(executor: E, project_id: &str) -> Result<f64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let total: Option<f64> =
        sqlx::query_scalar("SELECT SUM(delta) FROM velocity_adjustments WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(executor)
            .await?;
    Ok(total.unwrap_or(0.0))
}

/// Net adjustment already applied to a project within one run
pub async fn run_adjustments_total<'e, E>(executor: E, project_id: &str, run_id: i64) -> Result<f64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let total: Option<f64> = sqlx::query_scalar(
        "SELECT SUM(delta) FROM velocity_adjustments WHERE project_id = ? AND run_id = ?",
    )
    .bind(project_id)
    .bind(run_id)
    .fetch_one(executor)
    .await?;
    Ok(total.unwrap_or(0.0))
}

/// Remember a project's score at the first write of a run; later calls for
/// the same run keep the first value
pub async fn record_run_baseline<'e, E>(executor: E, project_id: &str, run_id: i64, score: f64) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT OR IGNORE INTO run_baselines (run_id, project_id, score) VALUES (?, ?, ?)")
        .bind(run_id)
        .bind(project_id)
        .bind(score)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn run_baseline<'e, E>(executor: E, project_id: &str, run_id: i64) -> Result<Option<f64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let score = sqlx::query_scalar("SELECT score FROM run_baselines WHERE run_id = ? AND project_id = ?")
        .bind(run_id)
        .bind(project_id)
        .fetch_optional(executor)
        .await?;
    Ok(score)
}

pub async fn list_adjustments<'e, E>(executor: E, project_id: &str) -> Result<Vec<VelocityAdjustment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, project_id, run_id, delta, justification, related_items, fingerprint,
               audit_entry_id, created_at
        FROM velocity_adjustments WHERE project_id = ? ORDER BY id
        "#,
    )
    .bind(project_id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            let related: String = row.try_get("related_items")?;
            let created_at: String = row.try_get("created_at")?;
            Ok(VelocityAdjustment {
                id: row.try_get("id")?,
                project_id: row.try_get("project_id")?,
                run_id: row.try_get("run_id")?,
                delta: row.try_get("delta")?,
                justification: row.try_get("justification")?,
                related_items: parse_string_list(&related)?,
                fingerprint: row.try_get("fingerprint")?,
                audit_entry_id: row.try_get("audit_entry_id")?,
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .collect()
}
