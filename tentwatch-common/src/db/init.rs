//! Database initialization
//!
//! Opens (or creates) the SQLite file and applies the schema. Every statement
//! is `IF NOT EXISTS`, so running it against an existing database is a no-op.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Short busy wait; longer contention is handled by `retry_on_lock`
const BUSY_TIMEOUT_MS: u64 = 250;

/// Current schema revision recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL lets dashboard readers run while the engine writes
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    // Ingest handlers and the reconcile scheduler write concurrently
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(2)
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

/// Single-connection in-memory database with the full schema (tests, tooling)
pub async fn init_memory_database() -> Result<SqlitePool> {
    // Every ":memory:" connection is a separate database, so pin the pool to one
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table and index
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_sites_table(pool).await?;
    create_devices_table(pool).await?;
    create_raw_camera_counts_table(pool).await?;
    create_raw_rfid_counts_table(pool).await?;
    create_pilgrims_table(pool).await?;
    create_counter_history_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Sites (tents/offices). Owned by the external admin service; seeded here
/// from the registry file.
async fn create_sites_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sites (
            id INTEGER PRIMARY KEY,
            company_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            capacity INTEGER NOT NULL DEFAULT 0 CHECK (capacity >= 0),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sites_company ON sites(company_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_devices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            serial TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL CHECK (kind IN ('camera', 'rfid', 'people_counter')),
            site_id INTEGER REFERENCES sites(id) ON DELETE SET NULL,
            last_seen INTEGER,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_devices_site ON devices(site_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Append-only camera events. `ts` is epoch seconds.
async fn create_raw_camera_counts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_camera_counts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
            device_serial TEXT NOT NULL,
            count INTEGER NOT NULL CHECK (count >= 0),
            ts INTEGER NOT NULL,
            image TEXT,
            received_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_raw_camera_site_ts ON raw_camera_counts(site_id, ts, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_raw_camera_ts ON raw_camera_counts(ts)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Append-only RFID events. `ts` is epoch seconds.
async fn create_raw_rfid_counts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_rfid_counts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
            device_serial TEXT NOT NULL,
            count INTEGER NOT NULL CHECK (count >= 0),
            ts INTEGER NOT NULL,
            received_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_raw_rfid_site_ts ON raw_rfid_counts(site_id, ts, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_raw_rfid_ts ON raw_rfid_counts(ts)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Reconciled per-(site, second) records.
///
/// The UNIQUE constraint is what serializes concurrent creators; `version`
/// guards in-place updates.
async fn create_pilgrims_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pilgrims (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
            ts INTEGER NOT NULL,
            camera_count INTEGER CHECK (camera_count >= 0),
            rfid_count INTEGER CHECK (rfid_count >= 0),
            violation_count INTEGER NOT NULL DEFAULT 0 CHECK (violation_count >= 0),
            image TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (site_id, ts)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pilgrims_ts ON pilgrims(ts)")
        .execute(pool)
        .await?;

    Ok(())
}

/// People-counter period totals. `start_time`/`end_time` are epoch seconds.
async fn create_counter_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counter_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
            device_serial TEXT NOT NULL,
            site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
            total_in INTEGER NOT NULL DEFAULT 0 CHECK (total_in >= 0),
            total_out INTEGER NOT NULL DEFAULT 0 CHECK (total_out >= 0),
            passby INTEGER NOT NULL DEFAULT 0,
            turnback INTEGER NOT NULL DEFAULT 0,
            avg_stay_time INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            start_time INTEGER,
            end_time INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_counter_history_site_end ON counter_history(site_id, end_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
