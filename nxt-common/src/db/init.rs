//! Database initialization
//!
//! Opens (creating if needed) the SQLite database under the root folder and
//! brings the schema up to date. Every statement is idempotent, so this runs
//! on each startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every connection; lock errors beyond this are
/// retried by the caller with backoff.
pub const BUSY_TIMEOUT_MS: u64 = 250;

/// Open the database and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL lets the presentation layer read while a run writes; foreign keys
    // and busy timeout are per-connection so they go on the connect options.
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables, indexes and append-only guards
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_projects_table(pool).await?;
    create_research_runs_table(pool).await?;
    create_audit_log_table(pool).await?;
    create_fingerprints_table(pool).await?;
    create_raid_items_table(pool).await?;
    create_raid_transitions_table(pool).await?;
    create_velocity_scores_table(pool).await?;
    create_velocity_adjustments_table(pool).await?;
    create_run_baselines_table(pool).await?;
    create_pending_findings_table(pool).await?;
    Ok(())
}

async fn create_projects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            location TEXT NOT NULL DEFAULT '',
            investment_billions REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL CHECK (status IN
                ('planning', 'construction', 'operational', 'delayed', 'cancelled')),
            company_ticker TEXT,
            research_keywords TEXT NOT NULL DEFAULT '[]',
            original_completion TEXT,
            current_completion TEXT,
            capacity TEXT,
            jobs INTEGER,
            velocity_score REAL,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_research_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS research_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            summary TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_audit_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL REFERENCES research_runs(run_id),
            stage TEXT NOT NULL CHECK (stage IN
                ('collection', 'validation', 'analysis', 'update')),
            project_id TEXT NOT NULL,
            outcome TEXT NOT NULL CHECK (outcome IN ('accepted', 'rejected', 'error')),
            reason TEXT NOT NULL,
            detail TEXT,
            fingerprint TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_run ON audit_log(run_id, project_id)",
    )
    .execute(pool)
    .await?;

    create_append_only_guard(pool, "audit_log").await
}

async fn create_fingerprints_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fingerprints (
            project_id TEXT NOT NULL,
            digest TEXT NOT NULL,
            summary TEXT NOT NULL,
            source_locator TEXT,
            published_on TEXT,
            run_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (project_id, digest)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_fingerprints_locator
        ON fingerprints(project_id, source_locator, published_on)
        "#,
    )
    .execute(pool)
    .await?;

    create_append_only_guard(pool, "fingerprints").await
}

async fn create_raid_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raid_items (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id),
            kind TEXT NOT NULL CHECK (kind IN ('risk', 'action', 'issue', 'decision')),
            seq INTEGER NOT NULL,
            severity TEXT NOT NULL,
            status TEXT NOT NULL,
            description TEXT NOT NULL,
            mitigation TEXT,
            owner TEXT,
            deadline TEXT,
            fingerprint TEXT NOT NULL,
            audit_entry_id INTEGER NOT NULL REFERENCES audit_log(id),
            source_locator TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (project_id, kind, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_raid_transitions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raid_transitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id TEXT NOT NULL REFERENCES raid_items(id),
            from_status TEXT NOT NULL,
            to_status TEXT NOT NULL,
            note TEXT,
            fingerprint TEXT NOT NULL,
            audit_entry_id INTEGER NOT NULL REFERENCES audit_log(id),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_append_only_guard(pool, "raid_transitions").await
}

async fn create_velocity_scores_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS velocity_scores (
            project_id TEXT PRIMARY KEY REFERENCES projects(id),
            score REAL NOT NULL,
            risk_adjusted REAL NOT NULL,
            trend TEXT NOT NULL,
            health TEXT NOT NULL,
            previous_score REAL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_velocity_adjustments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS velocity_adjustments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL REFERENCES projects(id),
            run_id INTEGER NOT NULL,
            delta REAL NOT NULL,
            justification TEXT NOT NULL,
            related_items TEXT NOT NULL DEFAULT '[]',
            fingerprint TEXT NOT NULL,
            audit_entry_id INTEGER NOT NULL REFERENCES audit_log(id),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_append_only_guard(pool, "velocity_adjustments").await
}

/// Score each project had when a run first wrote to it; the run's net
/// movement is measured against it.
async fn create_run_baselines_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_baselines (
            run_id INTEGER NOT NULL REFERENCES research_runs(run_id),
            project_id TEXT NOT NULL REFERENCES projects(id),
            score REAL NOT NULL,
            PRIMARY KEY (run_id, project_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Admitted findings whose analysis or update did not finish; replayed on
/// the next run for the project and deleted once they reach a decision.
async fn create_pending_findings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_findings (
            project_id TEXT NOT NULL,
            digest TEXT NOT NULL,
            payload TEXT NOT NULL,
            reason TEXT NOT NULL,
            run_id INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            PRIMARY KEY (project_id, digest)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Reject UPDATE and DELETE on an append-only table
async fn create_append_only_guard(pool: &SqlitePool, table: &str) -> Result<()> {
    for (op, suffix) in [("UPDATE", "no_update"), ("DELETE", "no_delete")] {
        let sql = format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_{suffix} BEFORE {op} ON {table} \
             BEGIN SELECT RAISE(ABORT, '{table} is append-only'); END"
        );
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}
