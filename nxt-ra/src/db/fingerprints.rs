//! Fingerprint store
//!
//! Append-only, partitioned by project id. `try_admit` is the admission gate:
//! a single INSERT that succeeds for at most one caller per
//! (project, digest), and refuses a second finding with the same source
//! locator and publication date.

use crate::types::Fingerprint;
use chrono::{NaiveDate, Utc};
use nxt_common::Result;
use sqlx::{Executor, Sqlite};

/// Record a fingerprint unless it (or its locator + date) is already known.
///
/// Returns true if this call inserted the row, i.e. the finding is admitted.
pub async fn try_admit<'e, E>(
    executor: E,
    project_id: &str,
    fingerprint: &Fingerprint,
    source_locator: Option<&str>,
    published_on: Option<NaiveDate>,
    run_id: i64,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let published_on = published_on.map(|d| d.to_string());

    // One statement, so SQLite's write lock makes check and insert atomic.
    // A NULL locator or date never matches the secondary key.
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO fingerprints
            (project_id, digest, summary, source_locator, published_on, run_id, created_at)
        SELECT ?, ?, ?, ?, ?, ?, ?
        WHERE NOT EXISTS (
            SELECT 1 FROM fingerprints
            WHERE project_id = ? AND source_locator = ? AND published_on = ?
        )
        "#,
    )
    .bind(project_id)
    .bind(&fingerprint.digest)
    .bind(&fingerprint.summary)
    .bind(source_locator)
    .bind(&published_on)
    .bind(run_id)
    .bind(Utc::now().to_rfc3339())
    .bind(project_id)
    .bind(source_locator)
    .bind(&published_on)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn contains<'e, E>(executor: E, project_id: &str, digest: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM fingerprints WHERE project_id = ? AND digest = ?")
            .bind(project_id)
            .bind(digest)
            .fetch_optional(executor)
            .await?;
    Ok(found.is_some())
}

pub async fn count_for_project<'e, E>(executor: E, project_id: &str) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fingerprints WHERE project_id = ?")
        .bind(project_id)
        .fetch_one(executor)
        .await?;
    Ok(count)
}
