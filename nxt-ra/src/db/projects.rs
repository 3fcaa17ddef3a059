//! Project portfolio queries

use super::{parse_date, parse_string_list, parse_timestamp};
use chrono::{NaiveDate, Utc};
use nxt_common::db::{Project, ProjectStatus};
use nxt_common::Result;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

/// Project definition as supplied by the portfolio seed file
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub investment_billions: f64,
    pub status: ProjectStatus,
    #[serde(default)]
    pub company_ticker: Option<String>,
    #[serde(default)]
    pub research_keywords: Vec<String>,
    #[serde(default)]
    pub original_completion: Option<NaiveDate>,
    #[serde(default)]
    pub current_completion: Option<NaiveDate>,
    #[serde(default)]
    pub capacity: Option<String>,
    #[serde(default)]
    pub jobs: Option<i64>,
}

const SELECT_PROJECT: &str = r#"
    SELECT id, name, category, location, investment_billions, status, company_ticker,
           research_keywords, original_completion, current_completion, capacity, jobs,
           velocity_score, version, created_at, updated_at
    FROM projects
"#;

fn row_to_project(row: &SqliteRow) -> Result<Project> {
    let status: String = row.try_get("status")?;
    let keywords: String = row.try_get("research_keywords")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        location: row.try_get("location")?,
        investment_billions: row.try_get("investment_billions")?,
        status: ProjectStatus::parse(&status)?,
        company_ticker: row.try_get("company_ticker")?,
        research_keywords: parse_string_list(&keywords)?,
        original_completion: parse_date(row.try_get("original_completion")?)?,
        current_completion: parse_date(row.try_get("current_completion")?)?,
        capacity: row.try_get("capacity")?,
        jobs: row.try_get("jobs")?,
        velocity_score: row.try_get("velocity_score")?,
        version: row.try_get("version")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Insert a project unless one with the same id exists; returns true if inserted
pub async fn insert_project<'e, E>(executor: E, project: &NewProject) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO projects (
            id, name, category, location, investment_billions, status, company_ticker,
            research_keywords, original_completion, current_completion, capacity, jobs,
            version, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(&project.category)
    .bind(&project.location)
    .bind(project.investment_billions)
    .bind(project.status.as_str())
    .bind(&project.company_ticker)
    .bind(serde_json::to_string(&project.research_keywords)?)
    .bind(project.original_completion.map(|d| d.to_string()))
    .bind(project.current_completion.map(|d| d.to_string()))
    .bind(&project.capacity)
    .bind(project.jobs)
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_project<'e, E>(executor: E, project_id: &str) -> Result<Option<Project>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_PROJECT);
    let row = sqlx::query(&sql)
        .bind(project_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_project).transpose()
}

/// All projects ordered by id
pub async fn list_projects<'e, E>(executor: E) -> Result<Vec<Project>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} ORDER BY id", SELECT_PROJECT);
    let rows = sqlx::query(&sql).fetch_all(executor).await?;
    rows.iter().map(row_to_project).collect()
}

/// Conditionally bump the project version and store the new velocity score.
///
/// Returns false when the stored version no longer equals `expected_version`,
/// i.e. someone else changed the project since it was read.
pub async fn bump_version<'e, E>(
    executor: E,
    project_id: &str,
    expected_version: i64,
    velocity_score: f64,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE projects
        SET version = version + 1, velocity_score = ?, updated_at = ?
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(velocity_score)
    .bind(Utc::now().to_rfc3339())
    .bind(project_id)
    .bind(expected_version)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Store an initial velocity score without touching `version`; seeding only
pub async fn set_initial_velocity<'e, E>(executor: E, project_id: &str, velocity_score: f64) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE projects SET velocity_score = ? WHERE id = ? AND velocity_score IS NULL")
        .bind(velocity_score)
        .bind(project_id)
        .execute(executor)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_pool;

    fn sample() -> NewProject {
        serde_json::from_value(serde_json::json!({
            "id": "BT015",
            "name": "Arizona Battery Plant",
            "category": "battery",
            "location": "Arizona",
            "investment_billions": 5.5,
            "status": "construction",
            "research_keywords": ["arizona battery plant"],
            "original_completion": "2025-06-30",
            "current_completion": "2025-12-31"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_load_project() {
        let (_dir, pool) = test_pool().await;

        assert!(insert_project(&pool, &sample()).await.unwrap());
        assert!(!insert_project(&pool, &sample()).await.unwrap(), "second insert is ignored");

        let project = get_project(&pool, "BT015").await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Construction);
        assert_eq!(project.version, 0);
        assert_eq!(project.research_keywords, vec!["arizona battery plant"]);
        assert_eq!(project.schedule_slip_days(), 184);
    }

    #[tokio::test]
    async fn test_bump_version_requires_expected_version() {
        let (_dir, pool) = test_pool().await;
        insert_project(&pool, &sample()).await.unwrap();

        assert!(bump_version(&pool, "BT015", 0, 60.0).await.unwrap());
        assert!(!bump_version(&pool, "BT015", 0, 61.0).await.unwrap());

        let project = get_project(&pool, "BT015").await.unwrap().unwrap();
        assert_eq!(project.version, 1);
        assert_eq!(project.velocity_score, Some(60.0));
    }
}
