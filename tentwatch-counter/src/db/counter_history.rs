//! People-counter history
//!
//! Interval reports from in/out counters. `site_id` is copied from the
//! device binding at ingest so later re-binding does not move history.

use sqlx::SqlitePool;
use tentwatch_common::db::CounterHistoryRow;
use tentwatch_common::Result;

/// One validated interval report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCounterHistory {
    pub device_id: i64,
    pub device_serial: String,
    pub site_id: i64,
    pub total_in: i64,
    pub total_out: i64,
    pub passby: i64,
    pub turnback: i64,
    pub avg_stay_time: i64,
    pub start_time: Option<i64>,
    pub end_time: i64,
}

/// Sums over every report of a site up to an instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct FlowTotals {
    pub total_in: i64,
    pub total_out: i64,
    pub samples: i64,
    pub last_end_time: Option<i64>,
}

/// Net flow of one report, keyed by its end time
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct FlowSample {
    pub end_time: i64,
    pub total_in: i64,
    pub total_out: i64,
}

pub async fn insert(db: &SqlitePool, report: &NewCounterHistory) -> Result<CounterHistoryRow> {
    let row = sqlx::query_as::<_, CounterHistoryRow>(
        r#"
        INSERT INTO counter_history (
            device_id, device_serial, site_id, total_in, total_out, passby,
            turnback, avg_stay_time, total, start_time, end_time
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id, device_id, device_serial, site_id, total_in, total_out, passby,
                  turnback, avg_stay_time, total, start_time, end_time
        "#,
    )
    .bind(report.device_id)
    .bind(&report.device_serial)
    .bind(report.site_id)
    .bind(report.total_in)
    .bind(report.total_out)
    .bind(report.passby)
    .bind(report.turnback)
    .bind(report.avg_stay_time)
    .bind(report.total_in - report.total_out)
    .bind(report.start_time)
    .bind(report.end_time)
    .fetch_one(db)
    .await?;

    Ok(row)
}

/// Totals over reports with `end_time <= end`
pub async fn totals_until(db: &SqlitePool, site_id: i64, end: i64) -> Result<FlowTotals> {
    let totals = sqlx::query_as::<_, FlowTotals>(
        r#"
        SELECT COALESCE(SUM(total_in), 0) AS total_in,
               COALESCE(SUM(total_out), 0) AS total_out,
               COUNT(*) AS samples,
               MAX(end_time) AS last_end_time
        FROM counter_history
        WHERE site_id = ? AND end_time <= ?
        "#,
    )
    .bind(site_id)
    .bind(end)
    .fetch_one(db)
    .await?;

    Ok(totals)
}

/// Totals over reports with `end_time < before`
pub async fn totals_before(db: &SqlitePool, site_id: i64, before: i64) -> Result<FlowTotals> {
    let totals = sqlx::query_as::<_, FlowTotals>(
        r#"
        SELECT COALESCE(SUM(total_in), 0) AS total_in,
               COALESCE(SUM(total_out), 0) AS total_out,
               COUNT(*) AS samples,
               MAX(end_time) AS last_end_time
        FROM counter_history
        WHERE site_id = ? AND end_time < ?
        "#,
    )
    .bind(site_id)
    .bind(before)
    .fetch_one(db)
    .await?;

    Ok(totals)
}

/// Reports with `start <= end_time < end`, ascending by end time
pub async fn samples_between(
    db: &SqlitePool,
    site_id: i64,
    start: i64,
    end: i64,
) -> Result<Vec<FlowSample>> {
    let samples = sqlx::query_as::<_, FlowSample>(
        r#"
        SELECT end_time, total_in, total_out
        FROM counter_history
        WHERE site_id = ? AND end_time >= ? AND end_time < ?
        ORDER BY end_time, id
        "#,
    )
    .bind(site_id)
    .bind(start)
    .bind(end)
    .fetch_all(db)
    .await?;

    Ok(samples)
}
