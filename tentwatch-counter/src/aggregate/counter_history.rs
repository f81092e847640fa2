//! Occupancy from people-counter history

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Serialize;
use tentwatch_common::db::Site;
use tentwatch_common::time::{from_epoch, to_epoch};
use tentwatch_common::{Error, Result};

use super::occupancy::{bucket_labels, occupancy_percentage, running_series, Occupancy};
use super::Dashboard;
use crate::db::counter_history;

/// Current occupancy of one site
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteOccupancy {
    pub site_id: i64,
    pub name: String,
    pub capacity: i64,
    pub total_in: i64,
    pub total_out: i64,
    pub current_staying: i64,
    pub current_percentage: f64,
    pub last_update: Option<DateTime<FixedOffset>>,
    pub sample_count: i64,
}

/// Occupancy over time for one site
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteSeries {
    pub site_id: i64,
    pub name: String,
    pub capacity: i64,
    pub sample_count: i64,
    pub hours: Vec<DateTime<FixedOffset>>,
    pub records: Vec<i64>,
}

impl Dashboard {
    /// Occupancy per site from every report ending at or before `end`.
    ///
    /// `start` only frames the response; history before it still counts
    /// toward who is inside.
    pub async fn occupancy_snapshot(
        &self,
        sites: &[Site],
        end: DateTime<Utc>,
    ) -> Result<Vec<SiteOccupancy>> {
        let mut results = Vec::with_capacity(sites.len());
        for site in sites {
            let totals = counter_history::totals_until(&self.db, site.id, to_epoch(end)).await?;
            let occupancy = Occupancy::from_totals(totals.total_in, totals.total_out);
            let last_update = totals
                .last_end_time
                .map(from_epoch)
                .transpose()?
                .map(|t| self.zone.to_local(t));

            results.push(SiteOccupancy {
                site_id: site.id,
                name: site.name.clone(),
                capacity: site.capacity,
                total_in: occupancy.total_in,
                total_out: occupancy.total_out,
                current_staying: occupancy.current_staying,
                current_percentage: occupancy_percentage(occupancy.current_staying, site.capacity),
                last_update,
                sample_count: totals.samples,
            });
        }
        Ok(results)
    }

    /// Running occupancy per site at every `interval_minutes` from `start` to `end`.
    pub async fn occupancy_series(
        &self,
        sites: &[Site],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_minutes: i64,
    ) -> Result<Vec<SiteSeries>> {
        if interval_minutes <= 0 {
            return Err(Error::InvalidInput(format!(
                "interval_minutes must be positive, got {}",
                interval_minutes
            )));
        }
        if start > end {
            return Err(Error::InvalidInput(
                "start_date_time must not be after end_date_time".to_string(),
            ));
        }

        let labels = bucket_labels(start, end, Duration::minutes(interval_minutes));
        let label_secs: Vec<i64> = labels.iter().map(|l| to_epoch(*l)).collect();
        let hours: Vec<DateTime<FixedOffset>> =
            labels.iter().map(|l| self.zone.to_local(*l)).collect();
        let window_end = label_secs.last().copied().unwrap_or_else(|| to_epoch(start));

        let mut results = Vec::with_capacity(sites.len());
        for site in sites {
            let before = counter_history::totals_before(&self.db, site.id, to_epoch(start)).await?;
            let samples =
                counter_history::samples_between(&self.db, site.id, to_epoch(start), window_end)
                    .await?;
            let (records, counted) =
                running_series(before.total_in - before.total_out, &label_secs, &samples);

            results.push(SiteSeries {
                site_id: site.id,
                name: site.name.clone(),
                capacity: site.capacity,
                sample_count: before.samples + counted as i64,
                hours: hours.clone(),
                records,
            });
        }
        Ok(results)
    }
}
