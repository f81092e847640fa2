//! Reconciliation engine
//!
//! Turns the latest raw camera and RFID rows for a (site, second) key into a
//! single reconciled record. Used inline by the ingest handlers and by the
//! periodic scheduler; both paths go through `merge_for_timestamp`.
//!
//! Concurrent writers for the same key are resolved without locks:
//! - creation relies on UNIQUE(site_id, ts); the loser re-reads and updates
//! - updates are conditional on `version`; a lost update re-reads and re-merges
//!
//! A writer that loses either race re-reads the raw rows as well as the
//! record, so it never writes counts older than the winner's.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tentwatch_common::db::{retry_on_lock, PilgrimRow};
use tentwatch_common::time::{to_epoch, truncate_to_second};
use tentwatch_common::{Error, Result};
use tracing::{debug, info, warn};

use super::merge::{merge, Incoming, Snapshot};
use crate::db::{pilgrims, raw_counts};
use crate::media::{remove_best_effort, EvidenceStore};

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// What a single-key merge did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeReport {
    /// No raw data for the key
    NoData,
    Created(PilgrimRow),
    Updated(PilgrimRow),
    /// Record already reflected the raw data; nothing written
    Unchanged(PilgrimRow),
}

impl MergeReport {
    pub fn record(&self) -> Option<&PilgrimRow> {
        match self {
            MergeReport::NoData => None,
            MergeReport::Created(row) | MergeReport::Updated(row) | MergeReport::Unchanged(row) => {
                Some(row)
            }
        }
    }

    pub fn into_record(self) -> Option<PilgrimRow> {
        match self {
            MergeReport::NoData => None,
            MergeReport::Created(row) | MergeReport::Updated(row) | MergeReport::Unchanged(row) => {
                Some(row)
            }
        }
    }
}

/// Per-second merge counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecondSummary {
    pub sites: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl SecondSummary {
    fn count(&mut self, report: &MergeReport) {
        match report {
            MergeReport::NoData => {}
            MergeReport::Created(_) => self.created += 1,
            MergeReport::Updated(_) => self.updated += 1,
            MergeReport::Unchanged(_) => self.unchanged += 1,
        }
    }
}

pub struct Reconciler {
    db: SqlitePool,
    store: Arc<dyn EvidenceStore>,
    max_conflict_retries: u32,
    max_lock_wait_ms: u64,
}

impl Reconciler {
    pub fn new(db: SqlitePool, store: Arc<dyn EvidenceStore>) -> Self {
        Self {
            db,
            store,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_limits(mut self, max_conflict_retries: u32, max_lock_wait_ms: u64) -> Self {
        self.max_conflict_retries = max_conflict_retries.max(1);
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    /// Reconcile one (site, second) key from its latest raw rows.
    pub async fn merge_for_timestamp(
        &self,
        site_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<MergeReport> {
        let ts = to_epoch(truncate_to_second(timestamp));

        let incoming = self.read_incoming(site_id, ts).await?;
        if incoming.is_empty() {
            debug!(site_id, ts, "No raw data for key");
            return Ok(MergeReport::NoData);
        }

        let existing = pilgrims::find(&self.db, site_id, ts).await?;
        self.upsert(site_id, ts, existing, incoming).await
    }

    /// Latest raw observations for a key
    async fn read_incoming(&self, site_id: i64, ts: i64) -> Result<Incoming> {
        let camera = raw_counts::latest_camera_count(&self.db, site_id, ts).await?;
        let rfid = raw_counts::latest_rfid_count(&self.db, site_id, ts).await?;

        Ok(Incoming {
            camera_count: camera.as_ref().map(|c| c.count),
            rfid_count: rfid.as_ref().map(|r| r.count),
            image: camera.and_then(|c| c.image),
        })
    }

    /// Re-read both raw rows and record after losing a race
    async fn reload(&self, site_id: i64, ts: i64) -> Result<(Option<PilgrimRow>, Incoming)> {
        let incoming = self.read_incoming(site_id, ts).await?;
        let existing = pilgrims::find(&self.db, site_id, ts).await?;
        Ok((existing, incoming))
    }

    /// Detach a discarded image from raw rows, then delete the file.
    ///
    /// The file stays if the raw rows cannot be detached, so no row ever
    /// references a missing image.
    async fn discard_image(&self, site_id: i64, ts: i64, key: &str) {
        let detached = retry_on_lock("evidence image detach", self.max_lock_wait_ms, || {
            raw_counts::detach_image(&self.db, key)
        })
        .await;

        match detached {
            Ok(rows) => {
                let cleanup = remove_best_effort(self.store.as_ref(), key).await;
                debug!(site_id, ts, key, rows, ?cleanup, "Evidence image detached");
            }
            Err(e) => {
                warn!(site_id, ts, key, error = %e, "Evidence image kept, raw rows still reference it");
            }
        }
    }

    /// Reconcile every site that has raw data at `timestamp`.
    ///
    /// A failing key is logged and counted; the rest still run.
    pub async fn merge_second(&self, timestamp: DateTime<Utc>) -> Result<SecondSummary> {
        let timestamp = truncate_to_second(timestamp);
        let sites = raw_counts::sites_with_data_at(&self.db, to_epoch(timestamp)).await?;

        let mut summary = SecondSummary {
            sites: sites.len(),
            ..Default::default()
        };
        for site_id in sites {
            match self.merge_for_timestamp(site_id, timestamp).await {
                Ok(report) => summary.count(&report),
                Err(e) => {
                    summary.failed += 1;
                    warn!(site_id, ts = %timestamp, error = %e, "Merge failed for key, skipping");
                }
            }
        }

        if summary.created + summary.updated > 0 {
            info!(
                ts = %timestamp,
                created = summary.created,
                updated = summary.updated,
                failed = summary.failed,
                "Reconciled second"
            );
        }
        Ok(summary)
    }

    /// Create-or-update starting from a possibly stale view of the record.
    ///
    /// `incoming` is only trusted for the first attempt; every retry works
    /// from freshly read raw rows.
    pub(crate) async fn upsert(
        &self,
        site_id: i64,
        ts: i64,
        mut existing: Option<PilgrimRow>,
        mut incoming: Incoming,
    ) -> Result<MergeReport> {
        for attempt in 1..=self.max_conflict_retries {
            if attempt > 1 && incoming.is_empty() {
                return Ok(existing.map_or(MergeReport::NoData, MergeReport::Unchanged));
            }

            match existing.take() {
                None => {
                    let outcome = merge(&Snapshot::absent(), &incoming);
                    let values = outcome.values();
                    let created = retry_on_lock("pilgrim insert", self.max_lock_wait_ms, || {
                        pilgrims::insert(&self.db, site_id, ts, &values)
                    })
                    .await;

                    match created {
                        Ok(row) => {
                            debug!(site_id, ts, violation = row.violation_count, "Record created");
                            return Ok(MergeReport::Created(row));
                        }
                        Err(e) if e.is_unique_violation() => {
                            debug!(site_id, ts, attempt, "Lost create race, switching to update");
                            (existing, incoming) = self.reload(site_id, ts).await?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Some(row) => {
                    let snapshot = Snapshot::from(&row);
                    let outcome = merge(&snapshot, &incoming);
                    if !outcome.differs_from(&snapshot) {
                        return Ok(MergeReport::Unchanged(row));
                    }

                    let values = outcome.values();
                    let updated = retry_on_lock("pilgrim update", self.max_lock_wait_ms, || {
                        pilgrims::update_if_version(&self.db, row.id, row.version, &values)
                    })
                    .await?;

                    match updated {
                        Some(updated) => {
                            if let Some(key) = outcome.discarded_image.as_deref() {
                                self.discard_image(site_id, ts, key).await;
                            }
                            debug!(
                                site_id,
                                ts,
                                version = updated.version,
                                violation = updated.violation_count,
                                "Record updated"
                            );
                            return Ok(MergeReport::Updated(updated));
                        }
                        None => {
                            debug!(site_id, ts, attempt, "Lost update race, re-reading");
                            (existing, incoming) = self.reload(site_id, ts).await?;
                        }
                    }
                }
            }
        }

        Err(Error::Conflict(format!(
            "pilgrims({}, {}) still contended after {} attempts",
            site_id, ts, self.max_conflict_retries
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FsEvidenceStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tentwatch_common::db::{init_memory_database, RegistryFile};

    const REGISTRY: &str = r#"
        [[sites]]
        id = 71
        company_id = 1
        name = "71-1"
        capacity = 40

        [[sites]]
        id = 72
        company_id = 1
        name = "71-2"
        capacity = 40
    "#;

    fn key_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 5, 9, 30, 15).unwrap()
    }

    async fn setup() -> (SqlitePool, Arc<FsEvidenceStore>, Reconciler, TempDir) {
        let db = init_memory_database().await.unwrap();
        RegistryFile::parse(REGISTRY).unwrap().apply(&db).await.unwrap();
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsEvidenceStore::new(dir.path(), "/media/"));
        let reconciler = Reconciler::new(db.clone(), store.clone());
        (db, store, reconciler, dir)
    }

    #[tokio::test]
    async fn test_no_raw_data_is_noop() {
        let (db, _store, reconciler, _dir) = setup().await;
        let report = reconciler.merge_for_timestamp(71, key_time()).await.unwrap();
        assert_eq!(report, MergeReport::NoData);
        assert!(pilgrims::find(&db, 71, to_epoch(key_time())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_violation_then_rfid_correction() {
        let (db, store, reconciler, dir) = setup().await;
        let ts = to_epoch(key_time());
        let image = store.save(key_time(), b"jpeg").await.unwrap();

        raw_counts::insert_camera_count(&db, 71, "CAM-71", 12, ts, Some(&image))
            .await
            .unwrap();
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 9, ts).await.unwrap();

        let report = reconciler.merge_for_timestamp(71, key_time()).await.unwrap();
        let record = report.record().unwrap();
        assert!(matches!(report, MergeReport::Created(_)));
        assert_eq!(record.violation_count, 3);
        assert_eq!(record.image.as_deref(), Some(image.as_str()));
        assert!(dir.path().join(&image).exists());

        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 12, ts).await.unwrap();
        let report = reconciler.merge_for_timestamp(71, key_time()).await.unwrap();
        let record = report.record().unwrap();
        assert!(matches!(report, MergeReport::Updated(_)));
        assert_eq!(record.rfid_count, Some(12));
        assert_eq!(record.violation_count, 0);
        assert_eq!(record.image, None);
        assert!(!dir.path().join(&image).exists());
    }

    #[tokio::test]
    async fn test_second_merge_writes_nothing() {
        let (db, _store, reconciler, _dir) = setup().await;
        let ts = to_epoch(key_time());
        raw_counts::insert_camera_count(&db, 71, "CAM-71", 8, ts, None).await.unwrap();
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 3, ts).await.unwrap();

        let first = reconciler.merge_for_timestamp(71, key_time()).await.unwrap();
        let second = reconciler.merge_for_timestamp(71, key_time()).await.unwrap();

        let first = first.into_record().unwrap();
        assert_eq!(second, MergeReport::Unchanged(first.clone()));
        let stored = pilgrims::find(&db, 71, ts).await.unwrap().unwrap();
        assert_eq!(stored.version, first.version);
    }

    #[tokio::test]
    async fn test_latest_duplicate_wins() {
        let (db, _store, reconciler, _dir) = setup().await;
        let ts = to_epoch(key_time());
        raw_counts::insert_camera_count(&db, 71, "CAM-71", 20, ts, None).await.unwrap();
        raw_counts::insert_camera_count(&db, 71, "CAM-71", 10, ts, None).await.unwrap();
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 4, ts).await.unwrap();

        let report = reconciler.merge_for_timestamp(71, key_time()).await.unwrap();
        assert_eq!(report.record().unwrap().camera_count, Some(10));
        assert_eq!(report.record().unwrap().violation_count, 6);
    }

    #[tokio::test]
    async fn test_sub_second_timestamps_share_a_key() {
        let (db, _store, reconciler, _dir) = setup().await;
        let ts = to_epoch(key_time());
        raw_counts::insert_camera_count(&db, 71, "CAM-71", 5, ts, None).await.unwrap();

        let report = reconciler
            .merge_for_timestamp(71, key_time() + chrono::Duration::milliseconds(750))
            .await
            .unwrap();
        assert_eq!(report.record().unwrap().ts, ts);
    }

    #[tokio::test]
    async fn test_stale_creator_falls_back_to_update() {
        let (db, _store, reconciler, _dir) = setup().await;
        let ts = to_epoch(key_time());

        // Another writer created the RFID side first
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 4, ts).await.unwrap();
        let rfid_side = reconciler.read_incoming(71, ts).await.unwrap();
        reconciler.upsert(71, ts, None, rfid_side).await.unwrap();

        // This writer still believes the record is absent
        raw_counts::insert_camera_count(&db, 71, "CAM-71", 9, ts, None).await.unwrap();
        let camera_side = Incoming {
            camera_count: Some(9),
            ..Default::default()
        };
        let report = reconciler.upsert(71, ts, None, camera_side).await.unwrap();

        let record = report.into_record().unwrap();
        assert_eq!(record.camera_count, Some(9));
        assert_eq!(record.rfid_count, Some(4));
        assert_eq!(record.violation_count, 5);
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn test_stale_version_is_retried() {
        let (db, _store, reconciler, _dir) = setup().await;
        let ts = to_epoch(key_time());

        raw_counts::insert_camera_count(&db, 71, "CAM-71", 7, ts, None).await.unwrap();
        let created = reconciler
            .merge_for_timestamp(71, key_time())
            .await
            .unwrap()
            .into_record()
            .unwrap();
        let stale = created.clone();

        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 2, ts).await.unwrap();
        reconciler.merge_for_timestamp(71, key_time()).await.unwrap();

        // Writer holding version 0 must not clobber the rfid side
        raw_counts::insert_camera_count(&db, 71, "CAM-71", 8, ts, None).await.unwrap();
        let report = reconciler
            .upsert(71, ts, Some(stale), Incoming { camera_count: Some(8), ..Default::default() })
            .await
            .unwrap();
        let record = report.into_record().unwrap();
        assert_eq!(record.camera_count, Some(8));
        assert_eq!(record.rfid_count, Some(2));
        assert_eq!(record.violation_count, 6);
        assert_eq!(record.version, 2);
        assert_eq!(pilgrims::find(&db, 71, ts).await.unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn test_writer_losing_race_rereads_raw_rows() {
        let (db, store, reconciler, dir) = setup().await;
        let ts = to_epoch(key_time());
        let first_image = store.save(key_time(), b"jpeg-12").await.unwrap();

        raw_counts::insert_camera_count(&db, 71, "CAM-71", 12, ts, Some(&first_image))
            .await
            .unwrap();
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 9, ts).await.unwrap();
        reconciler.merge_for_timestamp(71, key_time()).await.unwrap();

        // Writer A sees the RFID correction, then stalls
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 12, ts).await.unwrap();
        let incoming_a = reconciler.read_incoming(71, ts).await.unwrap();
        let record_a = pilgrims::find(&db, 71, ts).await.unwrap();

        // Writer B stores a newer camera count with evidence and merges first
        let newer_image = store.save(key_time(), b"jpeg-15").await.unwrap();
        raw_counts::insert_camera_count(&db, 71, "CAM-71", 15, ts, Some(&newer_image))
            .await
            .unwrap();
        let merged_b = reconciler
            .merge_for_timestamp(71, key_time())
            .await
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(merged_b.violation_count, 3);

        // Writer A resumes with its stale view
        let report = reconciler.upsert(71, ts, record_a, incoming_a).await.unwrap();
        let record = report.into_record().unwrap();
        assert_eq!(record.camera_count, Some(15));
        assert_eq!(record.rfid_count, Some(12));
        assert_eq!(record.violation_count, 3);
        assert_eq!(record.image.as_deref(), Some(newer_image.as_str()));
        assert!(dir.path().join(&newer_image).exists());
        assert_eq!(pilgrims::find(&db, 71, ts).await.unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn test_returning_violation_never_points_at_deleted_image() {
        let (db, store, reconciler, dir) = setup().await;
        let ts = to_epoch(key_time());
        let image = store.save(key_time(), b"jpeg").await.unwrap();

        raw_counts::insert_camera_count(&db, 71, "CAM-71", 12, ts, Some(&image))
            .await
            .unwrap();
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 9, ts).await.unwrap();
        reconciler.merge_for_timestamp(71, key_time()).await.unwrap();

        // Cleared: file deleted and detached from the raw row
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 12, ts).await.unwrap();
        reconciler.merge_for_timestamp(71, key_time()).await.unwrap();
        assert!(!dir.path().join(&image).exists());
        let camera = raw_counts::latest_camera_count(&db, 71, ts).await.unwrap().unwrap();
        assert_eq!(camera.image, None);

        // Downward correction brings the violation back, without evidence
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 10, ts).await.unwrap();
        let report = reconciler.merge_for_timestamp(71, key_time()).await.unwrap();
        let record = report.record().unwrap();
        assert_eq!(record.violation_count, 2);
        assert_eq!(record.image, None);
    }

    #[tokio::test]
    async fn test_image_kept_when_raw_rows_cannot_be_detached() {
        let (db, store, reconciler, dir) = setup().await;
        let ts = to_epoch(key_time());
        let image = store.save(key_time(), b"jpeg").await.unwrap();

        raw_counts::insert_camera_count(&db, 71, "CAM-71", 12, ts, Some(&image))
            .await
            .unwrap();
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 9, ts).await.unwrap();
        reconciler.merge_for_timestamp(71, key_time()).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER raw_camera_frozen BEFORE UPDATE ON raw_camera_counts \
             BEGIN SELECT RAISE(ABORT, 'raw rows are read-only'); END",
        )
        .execute(&db)
        .await
        .unwrap();

        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 12, ts).await.unwrap();
        let report = reconciler.merge_for_timestamp(71, key_time()).await.unwrap();
        assert_eq!(report.record().unwrap().image, None);
        assert!(dir.path().join(&image).exists());
    }

    #[tokio::test]
    async fn test_merge_second_covers_all_sites() {
        let (db, _store, reconciler, _dir) = setup().await;
        let ts = to_epoch(key_time());
        raw_counts::insert_camera_count(&db, 71, "CAM-71", 5, ts, None).await.unwrap();
        raw_counts::insert_rfid_count(&db, 72, "RFID-72", 2, ts).await.unwrap();
        raw_counts::insert_rfid_count(&db, 72, "RFID-72", 2, ts + 1).await.unwrap();

        let summary = reconciler.merge_second(key_time()).await.unwrap();
        assert_eq!(summary.sites, 2);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.failed, 0);

        let again = reconciler.merge_second(key_time()).await.unwrap();
        assert_eq!(again.unchanged, 2);
        assert!(pilgrims::find(&db, 72, ts + 1).await.unwrap().is_none());
    }

    struct BrokenStore;

    #[async_trait]
    impl EvidenceStore for BrokenStore {
        async fn save(&self, _captured_at: DateTime<Utc>, _bytes: &[u8]) -> Result<String> {
            Err(Error::Internal("read-only volume".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(Error::Internal("read-only volume".to_string()))
        }

        fn url_for(&self, key: &str) -> String {
            key.to_string()
        }
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_fail_merge() {
        let db = init_memory_database().await.unwrap();
        RegistryFile::parse(REGISTRY).unwrap().apply(&db).await.unwrap();
        let reconciler = Reconciler::new(db.clone(), Arc::new(BrokenStore));
        let ts = to_epoch(key_time());

        raw_counts::insert_camera_count(&db, 71, "CAM-71", 12, ts, Some("counter_image/x.jpg"))
            .await
            .unwrap();
        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 9, ts).await.unwrap();
        reconciler.merge_for_timestamp(71, key_time()).await.unwrap();

        raw_counts::insert_rfid_count(&db, 71, "RFID-71", 15, ts).await.unwrap();
        let report = reconciler.merge_for_timestamp(71, key_time()).await.unwrap();
        let record = report.record().unwrap();
        assert_eq!(record.violation_count, 0);
        assert_eq!(record.image, None);
    }
}
