//! Database initialization against real files
//!
//! Covers first-run creation, reopening an existing database, and the
//! constraints the reconcile engine relies on.

use sqlx::SqlitePool;
use tempfile::TempDir;
use tentwatch_common::db::init::{init_database, init_memory_database, SCHEMA_VERSION};
use tentwatch_common::db::{find_site, RegistryFile};
use tentwatch_common::Error;

const TABLES: [&str; 7] = [
    "schema_version",
    "sites",
    "devices",
    "raw_camera_counts",
    "raw_rfid_counts",
    "pilgrims",
    "counter_history",
];

async fn table_names(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
}

async fn seed_site(pool: &SqlitePool) {
    RegistryFile::parse("[[sites]]\nid = 71\ncompany_id = 1\nname = \"71-1\"\n")
        .unwrap()
        .apply(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_database_created_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("tentwatch.db");
    assert!(!db_path.exists());

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists(), "database file was not created");

    let names = table_names(&pool).await;
    for table in TABLES {
        assert!(names.iter().any(|n| n == table), "missing table {}", table);
    }
}

#[tokio::test]
async fn test_reopen_keeps_data_and_schema_version() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("tentwatch.db");

    let pool = init_database(&db_path).await.unwrap();
    seed_site(&pool).await;
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    assert_eq!(find_site(&pool, 71).await.unwrap().unwrap().name, "71-1");

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(versions, vec![SCHEMA_VERSION]);
}

#[tokio::test]
async fn test_file_database_uses_wal_and_foreign_keys() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("tentwatch.db")).await.unwrap();

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");

    let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(fk, 1);
}

#[tokio::test]
async fn test_one_record_per_site_second() {
    let pool = init_memory_database().await.unwrap();
    seed_site(&pool).await;

    let insert = "INSERT INTO pilgrims (site_id, ts, camera_count, violation_count) VALUES (71, 1000, 3, 3)";
    sqlx::query(insert).execute(&pool).await.unwrap();

    let err: Error = sqlx::query(insert).execute(&pool).await.unwrap_err().into();
    assert!(err.is_unique_violation());
    assert!(!err.is_lock_contention());
}

#[tokio::test]
async fn test_records_require_a_known_site() {
    let pool = init_memory_database().await.unwrap();

    let result = sqlx::query("INSERT INTO pilgrims (site_id, ts) VALUES (999, 1000)")
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_negative_counts_rejected_by_schema() {
    let pool = init_memory_database().await.unwrap();
    seed_site(&pool).await;

    let result = sqlx::query("INSERT INTO pilgrims (site_id, ts, rfid_count) VALUES (71, 1000, -1)")
        .execute(&pool)
        .await;
    assert!(result.is_err());
}
