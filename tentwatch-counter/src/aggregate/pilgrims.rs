//! Violation dashboard over reconciled records

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tentwatch_common::db::{device_kinds_for_site, DeviceKind, PilgrimRow, Site};
use tentwatch_common::natural_sort::natural_cmp;
use tentwatch_common::time::{from_epoch, to_epoch};
use tentwatch_common::{Error, Result, SiteZone};

use super::Dashboard;
use crate::db::pilgrims;
use crate::media::EvidenceStore;

pub const DEFAULT_RECORD_LIMIT: i64 = 500;
const MAX_RECORD_LIMIT: i64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    Red,
    Green,
}

impl Indicator {
    pub fn for_violations(violations: i64) -> Self {
        if violations > 0 {
            Indicator::Red
        } else {
            Indicator::Green
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteViolations {
    pub site_id: i64,
    pub site_name: String,
    pub illegal_pilgrims: i64,
    pub total_people: i64,
    pub indicator: Indicator,
    pub is_sensor_available: bool,
}

/// Reconciled record as returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PilgrimView {
    pub id: i64,
    pub site_id: i64,
    pub camera_count: Option<i64>,
    pub rfid_count: Option<i64>,
    pub violation_count: i64,
    pub time_stamp: DateTime<FixedOffset>,
    pub image: Option<String>,
    pub image_url: Option<String>,
}

impl PilgrimView {
    pub fn from_row(row: PilgrimRow, zone: &SiteZone, store: &dyn EvidenceStore) -> Result<Self> {
        let time_stamp = zone.to_local(from_epoch(row.ts)?);
        let image_url = row.image.as_deref().map(|key| store.url_for(key));
        Ok(Self {
            id: row.id,
            site_id: row.site_id,
            camera_count: row.camera_count,
            rfid_count: row.rfid_count,
            violation_count: row.violation_count,
            time_stamp,
            image: row.image,
            image_url,
        })
    }
}

impl Dashboard {
    /// Violation totals per site over `start <= ts <= end`, in natural name order.
    pub async fn violation_dashboard(
        &self,
        sites: &[Site],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SiteViolations>> {
        let mut results = Vec::with_capacity(sites.len());
        for site in sites {
            let totals =
                pilgrims::totals_in_window(&self.db, site.id, to_epoch(start), to_epoch(end))
                    .await?;
            let kinds = device_kinds_for_site(&self.db, site.id).await?;
            let is_sensor_available = kinds
                .iter()
                .any(|k| matches!(k, DeviceKind::Camera | DeviceKind::Rfid));

            results.push(SiteViolations {
                site_id: site.id,
                site_name: site.name.clone(),
                illegal_pilgrims: totals.violation_total,
                total_people: totals.camera_total,
                indicator: Indicator::for_violations(totals.violation_total),
                is_sensor_available,
            });
        }

        results.sort_by(|a, b| natural_cmp(&a.site_name, &b.site_name));
        Ok(results)
    }

    /// Reconciled records of one site, newest first.
    pub async fn pilgrim_records(
        &self,
        site: &Site,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<PilgrimView>> {
        let limit = limit.unwrap_or(DEFAULT_RECORD_LIMIT);
        if !(1..=MAX_RECORD_LIMIT).contains(&limit) {
            return Err(Error::InvalidInput(format!(
                "limit must be between 1 and {}",
                MAX_RECORD_LIMIT
            )));
        }

        let rows =
            pilgrims::list_in_window(&self.db, site.id, to_epoch(start), to_epoch(end), limit)
                .await?;
        rows.into_iter()
            .map(|row| PilgrimView::from_row(row, &self.zone, self.store.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pilgrims::{insert, PilgrimValues};
    use crate::media::FsEvidenceStore;
    use chrono::TimeZone;
    use sqlx::SqlitePool;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tentwatch_common::db::{init_memory_database, sites_for_company, RegistryFile};

    const REGISTRY: &str = r#"
        [[sites]]
        id = 1
        company_id = 1
        name = "71-10"

        [[sites]]
        id = 2
        company_id = 1
        name = "71-2"

        [[sites]]
        id = 3
        company_id = 1
        name = "71-1"

        [[devices]]
        serial = "CAM-1"
        kind = "camera"
        site_id = 1

        [[devices]]
        serial = "PC-2"
        kind = "people_counter"
        site_id = 2
    "#;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 5, h, m, 0).unwrap()
    }

    async fn record(db: &SqlitePool, site_id: i64, at: DateTime<Utc>, camera: i64, rfid: i64) {
        let violation = (camera - rfid).max(0);
        insert(
            db,
            site_id,
            to_epoch(at),
            &PilgrimValues {
                camera_count: Some(camera),
                rfid_count: Some(rfid),
                violation_count: violation,
                image: (violation > 0).then(|| format!("counter_image/{}.jpg", to_epoch(at))),
            },
        )
        .await
        .unwrap();
    }

    async fn setup() -> (Dashboard, SqlitePool, Vec<Site>, TempDir) {
        let db = init_memory_database().await.unwrap();
        RegistryFile::parse(REGISTRY).unwrap().apply(&db).await.unwrap();
        let sites = sites_for_company(&db, 1).await.unwrap();
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsEvidenceStore::new(dir.path(), "/media/"));
        (Dashboard::new(db.clone(), SiteZone::default(), store), db, sites, dir)
    }

    #[tokio::test]
    async fn test_dashboard_sums_window_and_sorts_naturally() {
        let (dashboard, db, sites, _dir) = setup().await;
        record(&db, 1, t(7, 0), 12, 9).await;
        record(&db, 1, t(7, 30), 5, 5).await;
        // Outside the window
        record(&db, 1, t(5, 0), 50, 0).await;
        record(&db, 2, t(7, 10), 4, 6).await;

        let results = dashboard.violation_dashboard(&sites, t(7, 0), t(7, 30)).await.unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.site_name.as_str()).collect();
        assert_eq!(names, vec!["71-1", "71-2", "71-10"]);

        let tent_10 = &results[2];
        assert_eq!(tent_10.illegal_pilgrims, 3);
        assert_eq!(tent_10.total_people, 17);
        assert_eq!(tent_10.indicator, Indicator::Red);
        assert!(tent_10.is_sensor_available);

        let tent_2 = &results[1];
        assert_eq!(tent_2.illegal_pilgrims, 0);
        assert_eq!(tent_2.indicator, Indicator::Green);
        // A people counter is not a violation sensor
        assert!(!tent_2.is_sensor_available);

        assert_eq!(results[0].total_people, 0);
    }

    #[tokio::test]
    async fn test_records_listing_has_urls() {
        let (dashboard, db, sites, _dir) = setup().await;
        record(&db, 1, t(7, 0), 12, 9).await;
        record(&db, 1, t(7, 1), 5, 5).await;

        let site = sites.iter().find(|s| s.id == 1).unwrap();
        let records = dashboard.pilgrim_records(site, t(6, 0), t(8, 0), None).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time_stamp.with_timezone(&Utc), t(7, 1));
        assert_eq!(records[0].image_url, None);
        assert_eq!(
            records[1].image_url.as_deref(),
            Some(format!("/media/counter_image/{}.jpg", to_epoch(t(7, 0))).as_str())
        );

        let limited = dashboard.pilgrim_records(site, t(6, 0), t(8, 0), Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert!(dashboard.pilgrim_records(site, t(6, 0), t(8, 0), Some(0)).await.is_err());
    }

    #[test]
    fn test_indicator_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Indicator::Red).unwrap(), "\"red\"");
        assert_eq!(Indicator::for_violations(0), Indicator::Green);
    }
}
