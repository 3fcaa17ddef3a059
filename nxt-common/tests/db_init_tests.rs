//! Database initialization and append-only guards

use nxt_common::db::init::init_database;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("nxt.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nxt.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("nxt.db")).await.unwrap();

    for table in [
        "projects",
        "research_runs",
        "audit_log",
        "fingerprints",
        "raid_items",
        "raid_transitions",
        "velocity_scores",
        "velocity_adjustments",
        "run_baselines",
        "pending_findings",
    ] {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1, "table {} missing", table);
    }
}

#[tokio::test]
async fn test_audit_log_rejects_update_and_delete() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("nxt.db")).await.unwrap();

    sqlx::query("INSERT INTO research_runs (status, started_at) VALUES ('running', '2024-03-01T00:00:00Z')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO audit_log (run_id, stage, project_id, outcome, reason, created_at)
         VALUES (1, 'validation', 'BT015', 'accepted', 'admitted', '2024-03-01T00:00:00Z')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let update = sqlx::query("UPDATE audit_log SET reason = 'edited'").execute(&pool).await;
    assert!(update.is_err(), "audit_log must be append-only");

    let delete = sqlx::query("DELETE FROM audit_log").execute(&pool).await;
    assert!(delete.is_err(), "audit_log must be append-only");

    let reason: String = sqlx::query_scalar("SELECT reason FROM audit_log WHERE id = 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(reason, "admitted");
}

#[tokio::test]
async fn test_fingerprint_primary_key_blocks_second_insert() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("nxt.db")).await.unwrap();

    let insert = "INSERT OR IGNORE INTO fingerprints
        (project_id, digest, summary, run_id, created_at)
        VALUES ('BT015', 'abc', 'permit approved', 1, '2024-03-01T00:00:00Z')";

    let first = sqlx::query(insert).execute(&pool).await.unwrap();
    let second = sqlx::query(insert).execute(&pool).await.unwrap();

    assert_eq!(first.rows_affected(), 1);
    assert_eq!(second.rows_affected(), 0);
}
