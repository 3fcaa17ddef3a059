//! RAID item queries
//!
//! Items are only ever inserted or moved forward in status by the update
//! stage; both happen inside its transaction.

use super::{parse_date, parse_timestamp};
use chrono::{NaiveDate, Utc};
use nxt_common::db::{RaidItem, RaidKind, RaidStatus, Severity};
use nxt_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

/// `<project_id>-<K>-<NNN>`, e.g. `BT015-D-001`
pub fn format_item_id(project_id: &str, kind: RaidKind, seq: i64) -> String {
    format!("{}-{}-{:03}", project_id, kind.code(), seq)
}

/// Fields of an item about to be inserted
#[derive(Debug, Clone)]
pub struct NewRaidItem<'a> {
    pub project_id: &'a str,
    pub kind: RaidKind,
    pub seq: i64,
    pub severity: Severity,
    pub description: &'a str,
    pub mitigation: Option<&'a str>,
    pub owner: Option<&'a str>,
    pub deadline: Option<NaiveDate>,
    pub fingerprint: &'a str,
    pub audit_entry_id: i64,
    pub source_locator: Option<&'a str>,
}

fn row_to_item(row: &SqliteRow) -> Result<RaidItem> {
    let kind: String = row.try_get("kind")?;
    let severity: String = row.try_get("severity")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(RaidItem {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        kind: RaidKind::parse(&kind)?,
        severity: Severity::parse(&severity)?,
        status: RaidStatus::parse(&status)?,
        description: row.try_get("description")?,
        mitigation: row.try_get("mitigation")?,
        owner: row.try_get("owner")?,
        deadline: parse_date(row.try_get("deadline")?)?,
        fingerprint: row.try_get("fingerprint")?,
        audit_entry_id: row.try_get("audit_entry_id")?,
        source_locator: row.try_get("source_locator")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// All items of a project, oldest first
pub async fn list_for_project<'e, E>(executor: E, project_id: &str) -> Result<Vec<RaidItem>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, project_id, kind, severity, status, description, mitigation, owner,
               deadline, fingerprint, audit_entry_id, source_locator, created_at, updated_at
        FROM raid_items
        WHERE project_id = ?
        ORDER BY kind, seq
        "#,
    )
    .bind(project_id)
    .fetch_all(executor)
    .await?;

    rows.iter().map(row_to_item).collect()
}

/// Highest sequence number used so far for a project + kind (0 if none)
pub async fn max_sequence<'e, E>(executor: E, project_id: &str, kind: RaidKind) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let max: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(seq) FROM raid_items WHERE project_id = ? AND kind = ?",
    )
    .bind(project_id)
    .bind(kind.as_str())
    .fetch_one(executor)
    .await?;

    Ok(max.unwrap_or(0))
}

/// Insert a new item in its kind's initial status; returns the item id
pub async fn insert_item<'e, E>(executor: E, item: &NewRaidItem<'_>) -> Result<String>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = format_item_id(item.project_id, item.kind, item.seq);
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO raid_items (
            id, project_id, kind, seq, severity, status, description, mitigation, owner,
            deadline, fingerprint, audit_entry_id, source_locator, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(item.project_id)
    .bind(item.kind.as_str())
    .bind(item.seq)
    .bind(item.severity.as_str())
    .bind(item.kind.initial_status().as_str())
    .bind(item.description)
    .bind(item.mitigation)
    .bind(item.owner)
    .bind(item.deadline.map(|d| d.to_string()))
    .bind(item.fingerprint)
    .bind(item.audit_entry_id)
    .bind(item.source_locator)
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await?;

    Ok(id)
}

/// Set an item's status; the caller has already checked the lifecycle
pub async fn set_status<'e, E>(executor: E, item_id: &str, status: RaidStatus) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE raid_items SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(item_id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Append a status transition record
pub async fn insert_transition<'e, E>(
    executor: E,
    item_id: &str,
    from: RaidStatus,
    to: RaidStatus,
    note: Option<&str>,
    fingerprint: &str,
    audit_entry_id: i64,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO raid_transitions
            (item_id, from_status, to_status, note, fingerprint, audit_entry_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(note)
    .bind(fingerprint)
    .bind(audit_entry_id)
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Number of items for a project
pub async fn count_for_project<'e, E>(executor: E, project_id: &str) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raid_items WHERE project_id = ?")
        .bind(project_id)
        .fetch_one(executor)
        .await?;
    Ok(count)
}
