//! Device ingest endpoints
//!
//! Each accepted event is stored raw, then its own (site, second) key is
//! reconciled right away so the response carries the current record. The
//! scheduler re-merges the key later regardless, so a failed inline merge
//! does not fail the request.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tentwatch_common::api::ApiEnvelope;
use tentwatch_common::db::CounterHistoryRow;
use tentwatch_common::time::from_epoch;
use tracing::warn;

use super::form::IngestForm;
use crate::aggregate::PilgrimView;
use crate::error::ApiResult;
use crate::AppState;

/// Camera snapshots can be large
const INGEST_BODY_LIMIT: usize = 10 * 1024 * 1024;

const PROCESSED: &str = "Data processed successfully.";

/// Stored raw event
#[derive(Debug, Serialize)]
pub struct RawEventView {
    pub id: i64,
    pub site_id: i64,
    pub sn: String,
    pub count: i64,
    pub time_stamp: DateTime<FixedOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub event: RawEventView,
    /// Reconciled record for the event's key, if the inline merge succeeded
    pub record: Option<PilgrimView>,
}

#[derive(Debug, Serialize)]
pub struct CounterHistoryView {
    pub id: i64,
    pub site_id: i64,
    pub sn: String,
    pub total_in: i64,
    pub total_out: i64,
    pub passby: i64,
    pub turnback: i64,
    pub avg_stay_time: i64,
    pub total: i64,
    pub start_time: Option<DateTime<FixedOffset>>,
    pub end_time: DateTime<FixedOffset>,
}

type Created<T> = (StatusCode, Json<ApiEnvelope<T>>);

async fn reconcile_inline(state: &AppState, site_id: i64, ts: i64) -> Option<PilgrimView> {
    let merged = match from_epoch(ts) {
        Ok(timestamp) => state.reconciler.merge_for_timestamp(site_id, timestamp).await,
        Err(e) => Err(e),
    };

    match merged {
        Ok(report) => report.into_record().and_then(|row| {
            PilgrimView::from_row(row, &state.zone, state.store.as_ref())
                .map_err(|e| warn!(site_id, ts, error = %e, "Cannot render record"))
                .ok()
        }),
        Err(e) => {
            warn!(site_id, ts, error = %e, "Inline merge failed; scheduler will retry");
            None
        }
    }
}

/// POST /api/pilgrims/camera-counter
///
/// Camera head count for one second, optionally with an evidence image.
///
/// **Fields:** `sn`, `count`, `time_stamp`, `image` (file part or base64)
///
/// **Errors:**
/// - 400: missing/invalid field
/// - 404: unknown camera serial, or camera not bound to a site
pub async fn camera_counter(
    State(state): State<AppState>,
    form: IngestForm,
) -> ApiResult<Created<IngestResponse>> {
    let row = state
        .ingestor
        .record_camera_event(&form.event_fields(), form.image())
        .await?;

    let record = reconcile_inline(&state, row.site_id, row.ts).await;
    let event = RawEventView {
        id: row.id,
        site_id: row.site_id,
        sn: row.device_serial,
        count: row.count,
        time_stamp: state.zone.to_local(from_epoch(row.ts)?),
        image_url: row.image.as_deref().map(|key| state.store.url_for(key)),
    };

    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::ok(PROCESSED, IngestResponse { event, record })),
    ))
}

/// POST /api/pilgrims/rfid-counter
///
/// RFID registration count for one second.
///
/// **Errors:**
/// - 400: missing/invalid field
/// - 404: unknown RFID serial, or reader not bound to a site
pub async fn rfid_counter(
    State(state): State<AppState>,
    form: IngestForm,
) -> ApiResult<Created<IngestResponse>> {
    let row = state.ingestor.record_rfid_event(&form.event_fields()).await?;

    let record = reconcile_inline(&state, row.site_id, row.ts).await;
    let event = RawEventView {
        id: row.id,
        site_id: row.site_id,
        sn: row.device_serial,
        count: row.count,
        time_stamp: state.zone.to_local(from_epoch(row.ts)?),
        image_url: None,
    };

    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::ok(PROCESSED, IngestResponse { event, record })),
    ))
}

/// POST /api/camera/counter-history
///
/// Period totals from a people-counter camera.
///
/// **Fields:** `sn`, `end_time`, optional `start_time`, `total_in`,
/// `total_out`, `passby`, `turnback`, `avg_stay_time`
pub async fn counter_history(
    State(state): State<AppState>,
    form: IngestForm,
) -> ApiResult<Created<CounterHistoryView>> {
    let row: CounterHistoryRow = state
        .ingestor
        .record_counter_history(&form.counter_history_fields())
        .await?;

    let start_time = match row.start_time {
        Some(secs) => Some(state.zone.to_local(from_epoch(secs)?)),
        None => None,
    };
    let view = CounterHistoryView {
        id: row.id,
        site_id: row.site_id,
        sn: row.device_serial,
        total_in: row.total_in,
        total_out: row.total_out,
        passby: row.passby,
        turnback: row.turnback,
        avg_stay_time: row.avg_stay_time,
        total: row.total,
        start_time,
        end_time: state.zone.to_local(from_epoch(row.end_time)?),
    };

    Ok((StatusCode::CREATED, Json(ApiEnvelope::ok(PROCESSED, view))))
}

/// Build ingest routes
pub fn ingest_routes() -> Router<AppState> {
    Router::new()
        .route("/api/pilgrims/camera-counter", post(camera_counter))
        .route("/api/pilgrims/rfid-counter", post(rfid_counter))
        .route("/api/camera/counter-history", post(counter_history))
        .layer(DefaultBodyLimit::max(INGEST_BODY_LIMIT))
}
