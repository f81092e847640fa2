//! Dashboard read endpoints
//!
//! All reads are tenant scoped (see `tenant`) and work over a time window:
//! explicit `start_date_time`/`end_date_time`, or the live window (local
//! midnight to now) when `is_live` is set or either bound is missing.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tentwatch_common::api::{parse_bool_flag, parse_id_list, ListEnvelope};
use tentwatch_common::SiteZone;

use crate::aggregate::occupancy::DEFAULT_INTERVAL_MINUTES;
use crate::aggregate::{
    resolve_sites, PilgrimView, SiteOccupancy, SiteSeries, SiteViolations, TenantScope,
};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Query parameters shared by dashboard reads
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub office_ids: Option<String>,
    pub site_ids: Option<String>,
    pub tent_list: Option<String>,
    pub site_id: Option<String>,
    pub start_date_time: Option<String>,
    pub end_date_time: Option<String>,
    pub is_live: Option<String>,
    pub interval_minutes: Option<String>,
    pub limit: Option<String>,
}

impl WindowQuery {
    /// Requested site ids from whichever alias was used
    pub fn site_filter(&self) -> ApiResult<Vec<i64>> {
        let raw = self
            .office_ids
            .as_deref()
            .or(self.site_ids.as_deref())
            .or(self.tent_list.as_deref())
            .unwrap_or("");
        Ok(parse_id_list(raw)?)
    }

    pub fn window(
        &self,
        zone: &SiteZone,
        now: DateTime<Utc>,
    ) -> ApiResult<(DateTime<Utc>, DateTime<Utc>)> {
        let is_live = parse_bool_flag(self.is_live.as_deref())?;
        let start = self.start_date_time.as_deref().filter(|s| !s.trim().is_empty());
        let end = self.end_date_time.as_deref().filter(|s| !s.trim().is_empty());

        match (is_live, start, end) {
            (false, Some(start), Some(end)) => {
                let start = zone.parse_timestamp(start)?;
                let end = zone.parse_timestamp(end)?;
                if start > end {
                    return Err(ApiError::Validation(
                        "start_date_time must not be after end_date_time".to_string(),
                    ));
                }
                Ok((start, end))
            }
            _ => Ok(zone.live_window(now)),
        }
    }

    fn int_param(raw: Option<&str>, name: &str) -> ApiResult<Option<i64>> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| ApiError::Validation(format!("{} must be an integer", name))),
        }
    }

    pub fn interval_minutes(&self) -> ApiResult<i64> {
        Ok(Self::int_param(self.interval_minutes.as_deref(), "interval_minutes")?
            .unwrap_or(DEFAULT_INTERVAL_MINUTES))
    }

    pub fn limit(&self) -> ApiResult<Option<i64>> {
        Self::int_param(self.limit.as_deref(), "limit")
    }
}

fn windowed<T>(
    state: &AppState,
    message: &str,
    results: Vec<T>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Json<ListEnvelope<T>> {
    Json(
        ListEnvelope::new(message, results)
            .with_window(state.zone.to_local(start), state.zone.to_local(end)),
    )
}

/// GET /api/camera/people-counter
///
/// Current occupancy per site from people-counter history up to the window end.
///
/// **Errors:**
/// - 400: malformed ids or timestamps
/// - 403: missing tenant context, or a site outside the caller's scope
pub async fn people_counter(
    State(state): State<AppState>,
    scope: TenantScope,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ListEnvelope<SiteOccupancy>>> {
    let requested = query.site_filter()?;
    let (start, end) = query.window(&state.zone, state.clock.now())?;
    let sites = resolve_sites(&state.db, &scope, &requested).await?;

    let results = state.dashboard.occupancy_snapshot(&sites, end).await?;
    Ok(windowed(&state, "Camera list fetched successfully.", results, start, end))
}

/// GET /api/camera/people-counter-graph
///
/// Running occupancy per site every `interval_minutes` (default 5).
pub async fn people_counter_graph(
    State(state): State<AppState>,
    scope: TenantScope,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ListEnvelope<SiteSeries>>> {
    let requested = query.site_filter()?;
    let (start, end) = query.window(&state.zone, state.clock.now())?;
    let interval = query.interval_minutes()?;
    let sites = resolve_sites(&state.db, &scope, &requested).await?;

    let results = state
        .dashboard
        .occupancy_series(&sites, start, end, interval)
        .await?;
    Ok(windowed(&state, "Interval data per tent fetched successfully.", results, start, end))
}

/// GET /api/pilgrims/dashboard
///
/// Violation totals per site, sorted by tent name in natural order.
pub async fn pilgrims_dashboard(
    State(state): State<AppState>,
    scope: TenantScope,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ListEnvelope<SiteViolations>>> {
    let requested = query.site_filter()?;
    let (start, end) = query.window(&state.zone, state.clock.now())?;
    let sites = resolve_sites(&state.db, &scope, &requested).await?;

    let results = state.dashboard.violation_dashboard(&sites, start, end).await?;
    Ok(windowed(&state, "Dashboard Illegal Pilgrims Data", results, start, end))
}

/// GET /api/pilgrims/records?site_id=..
///
/// Reconciled records of one site, newest first, with evidence image URLs.
///
/// **Errors:**
/// - 400: `site_id` missing or malformed, bad `limit`
/// - 403/404: site outside scope / unknown
pub async fn pilgrim_records(
    State(state): State<AppState>,
    scope: TenantScope,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ListEnvelope<PilgrimView>>> {
    let site_id = WindowQuery::int_param(query.site_id.as_deref(), "site_id")?
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::Validation("site_id is required".to_string()))?;
    let (start, end) = query.window(&state.zone, state.clock.now())?;
    let limit = query.limit()?;

    let sites = resolve_sites(&state.db, &scope, &[site_id]).await?;
    let mut results = Vec::new();
    for site in &sites {
        results.extend(state.dashboard.pilgrim_records(site, start, end, limit).await?);
    }
    Ok(windowed(&state, "Pilgrim records fetched successfully.", results, start, end))
}

/// Build dashboard routes
pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/api/camera/people-counter", get(people_counter))
        .route("/api/camera/people-counter-graph", get(people_counter_graph))
        .route("/api/pilgrims/dashboard", get(pilgrims_dashboard))
        .route("/api/pilgrims/records", get(pilgrim_records))
}
