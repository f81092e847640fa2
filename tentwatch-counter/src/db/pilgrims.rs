//! Reconciled records
//!
//! One row per (site, second). Creation relies on the UNIQUE(site_id, ts)
//! constraint; updates are conditional on the row `version` so a stale
//! writer affects zero rows instead of clobbering a newer merge.

use sqlx::SqlitePool;
use tentwatch_common::db::PilgrimRow;
use tentwatch_common::Result;

const PILGRIM_COLUMNS: &str =
    "id, site_id, ts, camera_count, rfid_count, violation_count, image, version";

/// Column values written by a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PilgrimValues {
    pub camera_count: Option<i64>,
    pub rfid_count: Option<i64>,
    pub violation_count: i64,
    pub image: Option<String>,
}

/// Window totals for one site
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct ViolationTotals {
    pub camera_total: i64,
    pub violation_total: i64,
}

pub async fn find(db: &SqlitePool, site_id: i64, ts: i64) -> Result<Option<PilgrimRow>> {
    let sql = format!(
        "SELECT {} FROM pilgrims WHERE site_id = ? AND ts = ?",
        PILGRIM_COLUMNS
    );
    let row = sqlx::query_as::<_, PilgrimRow>(&sql)
        .bind(site_id)
        .bind(ts)
        .fetch_optional(db)
        .await?;

    Ok(row)
}

/// Insert a new record. A concurrent creator surfaces as a unique violation
/// (see `Error::is_unique_violation`).
pub async fn insert(
    db: &SqlitePool,
    site_id: i64,
    ts: i64,
    values: &PilgrimValues,
) -> Result<PilgrimRow> {
    let sql = format!(
        r#"
        INSERT INTO pilgrims (site_id, ts, camera_count, rfid_count, violation_count, image, version)
        VALUES (?, ?, ?, ?, ?, ?, 0)
        RETURNING {}
        "#,
        PILGRIM_COLUMNS
    );
    let row = sqlx::query_as::<_, PilgrimRow>(&sql)
        .bind(site_id)
        .bind(ts)
        .bind(values.camera_count)
        .bind(values.rfid_count)
        .bind(values.violation_count)
        .bind(values.image.as_deref())
        .fetch_one(db)
        .await?;

    Ok(row)
}

/// Update a record only if it still carries `expected_version`.
///
/// Returns `None` when another writer got there first.
pub async fn update_if_version(
    db: &SqlitePool,
    id: i64,
    expected_version: i64,
    values: &PilgrimValues,
) -> Result<Option<PilgrimRow>> {
    let sql = format!(
        r#"
        UPDATE pilgrims
        SET camera_count = ?,
            rfid_count = ?,
            violation_count = ?,
            image = ?,
            version = version + 1,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ? AND version = ?
        RETURNING {}
        "#,
        PILGRIM_COLUMNS
    );
    let row = sqlx::query_as::<_, PilgrimRow>(&sql)
        .bind(values.camera_count)
        .bind(values.rfid_count)
        .bind(values.violation_count)
        .bind(values.image.as_deref())
        .bind(id)
        .bind(expected_version)
        .fetch_optional(db)
        .await?;

    Ok(row)
}

/// Camera and violation sums over `start <= ts <= end`
pub async fn totals_in_window(
    db: &SqlitePool,
    site_id: i64,
    start: i64,
    end: i64,
) -> Result<ViolationTotals> {
    let totals = sqlx::query_as::<_, ViolationTotals>(
        r#"
        SELECT COALESCE(SUM(camera_count), 0) AS camera_total,
               COALESCE(SUM(violation_count), 0) AS violation_total
        FROM pilgrims
        WHERE site_id = ? AND ts >= ? AND ts <= ?
        "#,
    )
    .bind(site_id)
    .bind(start)
    .bind(end)
    .fetch_one(db)
    .await?;

    Ok(totals)
}

/// Records of one site in `start <= ts <= end`, newest first
pub async fn list_in_window(
    db: &SqlitePool,
    site_id: i64,
    start: i64,
    end: i64,
    limit: i64,
) -> Result<Vec<PilgrimRow>> {
    let sql = format!(
        r#"
        SELECT {}
        FROM pilgrims
        WHERE site_id = ? AND ts >= ? AND ts <= ?
        ORDER BY ts DESC
        LIMIT ?
        "#,
        PILGRIM_COLUMNS
    );
    let rows = sqlx::query_as::<_, PilgrimRow>(&sql)
        .bind(site_id)
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(db)
        .await?;

    Ok(rows)
}
