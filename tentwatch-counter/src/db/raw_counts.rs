//! Raw camera and RFID events
//!
//! Append-only, except that a deleted evidence image is detached from the
//! camera rows referencing it. Several rows may share a (site, ts) key when a
//! device resends; readers take the highest id.

use sqlx::SqlitePool;
use tentwatch_common::db::{RawCameraCount, RawRfidCount};
use tentwatch_common::Result;

pub async fn insert_camera_count(
    db: &SqlitePool,
    site_id: i64,
    device_serial: &str,
    count: i64,
    ts: i64,
    image: Option<&str>,
) -> Result<RawCameraCount> {
    let row = sqlx::query_as::<_, RawCameraCount>(
        r#"
        INSERT INTO raw_camera_counts (site_id, device_serial, count, ts, image)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id, site_id, device_serial, count, ts, image
        "#,
    )
    .bind(site_id)
    .bind(device_serial)
    .bind(count)
    .bind(ts)
    .bind(image)
    .fetch_one(db)
    .await?;

    Ok(row)
}

pub async fn insert_rfid_count(
    db: &SqlitePool,
    site_id: i64,
    device_serial: &str,
    count: i64,
    ts: i64,
) -> Result<RawRfidCount> {
    let row = sqlx::query_as::<_, RawRfidCount>(
        r#"
        INSERT INTO raw_rfid_counts (site_id, device_serial, count, ts)
        VALUES (?, ?, ?, ?)
        RETURNING id, site_id, device_serial, count, ts
        "#,
    )
    .bind(site_id)
    .bind(device_serial)
    .bind(count)
    .bind(ts)
    .fetch_one(db)
    .await?;

    Ok(row)
}

/// Most recent camera row for a key
pub async fn latest_camera_count(
    db: &SqlitePool,
    site_id: i64,
    ts: i64,
) -> Result<Option<RawCameraCount>> {
    let row = sqlx::query_as::<_, RawCameraCount>(
        r#"
        SELECT id, site_id, device_serial, count, ts, image
        FROM raw_camera_counts
        WHERE site_id = ? AND ts = ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(site_id)
    .bind(ts)
    .fetch_optional(db)
    .await?;

    Ok(row)
}

/// Most recent RFID row for a key
pub async fn latest_rfid_count(
    db: &SqlitePool,
    site_id: i64,
    ts: i64,
) -> Result<Option<RawRfidCount>> {
    let row = sqlx::query_as::<_, RawRfidCount>(
        r#"
        SELECT id, site_id, device_serial, count, ts
        FROM raw_rfid_counts
        WHERE site_id = ? AND ts = ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(site_id)
    .bind(ts)
    .fetch_optional(db)
    .await?;

    Ok(row)
}

/// Drop references to an evidence image that is about to leave storage
pub async fn detach_image(db: &SqlitePool, key: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE raw_camera_counts SET image = NULL WHERE image = ?")
        .bind(key)
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}

/// Sites with any raw data (either source) at one second
pub async fn sites_with_data_at(db: &SqlitePool, ts: i64) -> Result<Vec<i64>> {
    let sites = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT site_id FROM raw_camera_counts WHERE ts = ?
        UNION
        SELECT site_id FROM raw_rfid_counts WHERE ts = ?
        ORDER BY site_id
        "#,
    )
    .bind(ts)
    .bind(ts)
    .fetch_all(db)
    .await?;

    Ok(sites)
}
