//! Device event ingest
//!
//! Validates what cameras, RFID gates and people counters send, resolves the
//! device to its site, and appends the raw row. Reconciliation is left to
//! `crate::reconcile`; the HTTP layer triggers it for the event's key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tentwatch_common::db::{
    find_device, retry_on_lock, touch_device, CounterHistoryRow, Device, DeviceKind,
    RawCameraCount, RawRfidCount,
};
use tentwatch_common::time::to_epoch;
use tentwatch_common::{Clock, Error, Result, SiteZone};
use tracing::{debug, info, warn};

use crate::db::counter_history::{self, NewCounterHistory};
use crate::db::raw_counts;
use crate::media::{remove_best_effort, EvidenceStore};

/// Event fields as received, before validation.
///
/// Counts arrive as text so JSON numbers, JSON strings and form fields all
/// pass through the same checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFields {
    pub serial: Option<String>,
    pub count: Option<String>,
    pub time_stamp: Option<String>,
}

/// People-counter period report as received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterHistoryFields {
    pub serial: Option<String>,
    pub total_in: Option<String>,
    pub total_out: Option<String>,
    pub passby: Option<String>,
    pub turnback: Option<String>,
    pub avg_stay_time: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEvent {
    pub serial: String,
    pub count: i64,
    /// Truncated to the second; this is the reconciliation key
    pub timestamp: DateTime<Utc>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("Missing field: {}", name)))
}

/// Parse a non-negative integer count
pub fn parse_count(raw: &str, name: &str) -> Result<i64> {
    let count = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::InvalidInput(format!("{} must be an integer, got '{}'", name, raw)))?;
    if count < 0 {
        return Err(Error::InvalidInput(format!("{} must not be negative", name)));
    }
    Ok(count)
}

fn optional_count(raw: &Option<String>, name: &str) -> Result<i64> {
    match raw.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => parse_count(raw, name),
        None => Ok(0),
    }
}

/// Check a camera or RFID event and derive its key timestamp.
pub fn validate_event(zone: &SiteZone, fields: &EventFields) -> Result<ValidatedEvent> {
    let serial = required(&fields.serial, "sn")?;
    let count = parse_count(required(&fields.count, "count")?, "count")?;
    let timestamp = zone.normalize_event_timestamp(required(&fields.time_stamp, "time_stamp")?)?;

    Ok(ValidatedEvent {
        serial: serial.to_string(),
        count,
        timestamp,
    })
}

pub struct Ingestor {
    db: SqlitePool,
    zone: SiteZone,
    clock: Arc<dyn Clock>,
    store: Arc<dyn EvidenceStore>,
    max_lock_wait_ms: u64,
}

impl Ingestor {
    pub fn new(
        db: SqlitePool,
        zone: SiteZone,
        clock: Arc<dyn Clock>,
        store: Arc<dyn EvidenceStore>,
    ) -> Self {
        Self {
            db,
            zone,
            clock,
            store,
            max_lock_wait_ms: crate::reconcile::engine::DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    /// Look up a device of the expected kind and its bound site
    async fn resolve_device(&self, serial: &str, expected: DeviceKind) -> Result<(Device, i64)> {
        let not_found = || match expected {
            DeviceKind::Camera => Error::NotFound("Invalid Camera SN".to_string()),
            DeviceKind::Rfid => Error::NotFound("Invalid RFID SN".to_string()),
            DeviceKind::PeopleCounter => Error::NotFound("Invalid People Counter SN".to_string()),
        };

        let device = find_device(&self.db, serial).await?.ok_or_else(not_found)?;
        if device.kind()? != expected {
            debug!(serial, kind = %device.kind, expected = %expected, "Device kind mismatch");
            return Err(not_found());
        }
        let site_id = device.site_id.ok_or_else(|| {
            Error::NotFound(format!("Device {} is not assigned to a site", serial))
        })?;

        Ok((device, site_id))
    }

    /// Best-effort: the event is already stored when this runs
    async fn heartbeat(&self, device: &Device) {
        let seen_at = to_epoch(self.clock.now());
        let touched = retry_on_lock("device heartbeat", self.max_lock_wait_ms, || {
            touch_device(&self.db, device.id, seen_at)
        })
        .await;
        if let Err(e) = touched {
            warn!(serial = %device.serial, error = %e, "Device heartbeat not recorded");
        }
    }

    /// Store a camera head count, with an optional evidence image.
    pub async fn record_camera_event(
        &self,
        fields: &EventFields,
        image: Option<&[u8]>,
    ) -> Result<RawCameraCount> {
        let event = validate_event(&self.zone, fields)?;
        let (device, site_id) = self.resolve_device(&event.serial, DeviceKind::Camera).await?;

        let image_key = match image.filter(|bytes| !bytes.is_empty()) {
            Some(bytes) => Some(self.store.save(event.timestamp, bytes).await?),
            None => None,
        };

        let ts = to_epoch(event.timestamp);
        let inserted = retry_on_lock("raw camera insert", self.max_lock_wait_ms, || {
            raw_counts::insert_camera_count(
                &self.db,
                site_id,
                &device.serial,
                event.count,
                ts,
                image_key.as_deref(),
            )
        })
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) => {
                if let Some(key) = image_key.as_deref() {
                    remove_best_effort(self.store.as_ref(), key).await;
                }
                return Err(e);
            }
        };

        self.heartbeat(&device).await;
        info!(
            serial = %device.serial,
            site_id,
            ts,
            count = row.count,
            image = row.image.is_some(),
            "Camera count received"
        );
        Ok(row)
    }

    /// Store an RFID registration count.
    pub async fn record_rfid_event(&self, fields: &EventFields) -> Result<RawRfidCount> {
        let event = validate_event(&self.zone, fields)?;
        let (device, site_id) = self.resolve_device(&event.serial, DeviceKind::Rfid).await?;

        let ts = to_epoch(event.timestamp);
        let row = retry_on_lock("raw rfid insert", self.max_lock_wait_ms, || {
            raw_counts::insert_rfid_count(&self.db, site_id, &device.serial, event.count, ts)
        })
        .await?;

        self.heartbeat(&device).await;
        info!(serial = %device.serial, site_id, ts, count = row.count, "RFID count received");
        Ok(row)
    }

    /// Store a people-counter period report.
    pub async fn record_counter_history(
        &self,
        fields: &CounterHistoryFields,
    ) -> Result<CounterHistoryRow> {
        let serial = required(&fields.serial, "sn")?;
        let end_time = self
            .zone
            .normalize_event_timestamp(required(&fields.end_time, "end_time")?)?;
        let start_time = match fields.start_time.as_deref().map(str::trim).filter(|v| !v.is_empty())
        {
            Some(raw) => Some(self.zone.normalize_event_timestamp(raw)?),
            None => None,
        };
        if let Some(start) = start_time {
            if start > end_time {
                return Err(Error::InvalidInput(
                    "start_time must not be after end_time".to_string(),
                ));
            }
        }

        let report_counts = (
            optional_count(&fields.total_in, "total_in")?,
            optional_count(&fields.total_out, "total_out")?,
            optional_count(&fields.passby, "passby")?,
            optional_count(&fields.turnback, "turnback")?,
            optional_count(&fields.avg_stay_time, "avg_stay_time")?,
        );

        let (device, site_id) = self.resolve_device(serial, DeviceKind::PeopleCounter).await?;
        let (total_in, total_out, passby, turnback, avg_stay_time) = report_counts;
        let report = NewCounterHistory {
            device_id: device.id,
            device_serial: device.serial.clone(),
            site_id,
            total_in,
            total_out,
            passby,
            turnback,
            avg_stay_time,
            start_time: start_time.map(to_epoch),
            end_time: to_epoch(end_time),
        };

        let row = retry_on_lock("counter history insert", self.max_lock_wait_ms, || {
            counter_history::insert(&self.db, &report)
        })
        .await?;

        self.heartbeat(&device).await;
        info!(
            serial = %device.serial,
            site_id,
            end_time = row.end_time,
            total_in,
            total_out,
            "Counter history received"
        );
        Ok(row)
    }
}
