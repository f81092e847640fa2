//! tentwatch-counter library
//!
//! Ingests camera and RFID head counts, reconciles them per (site, second)
//! into violation records, and serves occupancy and violation dashboards.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use sqlx::SqlitePool;
use tentwatch_common::config::ReconcileConfig;
use tentwatch_common::{Clock, SiteZone};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod aggregate;
pub mod api;
pub mod db;
pub mod error;
pub mod ingest;
pub mod media;
pub mod reconcile;

pub use error::{ApiError, ApiResult};

use aggregate::Dashboard;
use ingest::Ingestor;
use media::EvidenceStore;
use reconcile::Reconciler;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub zone: SiteZone,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn EvidenceStore>,
    pub ingestor: Arc<Ingestor>,
    pub reconciler: Arc<Reconciler>,
    pub dashboard: Arc<Dashboard>,
    /// Directory served under `/media`, if evidence lives on local disk
    pub media_root: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        zone: SiteZone,
        clock: Arc<dyn Clock>,
        store: Arc<dyn EvidenceStore>,
        limits: &ReconcileConfig,
    ) -> Self {
        let reconciler = Arc::new(
            Reconciler::new(db.clone(), store.clone())
                .with_limits(limits.max_conflict_retries, limits.max_lock_wait_ms),
        );
        let ingestor = Arc::new(
            Ingestor::new(db.clone(), zone, clock.clone(), store.clone())
                .with_max_lock_wait_ms(limits.max_lock_wait_ms),
        );
        let dashboard = Arc::new(Dashboard::new(db.clone(), zone, store.clone()));

        Self {
            db,
            zone,
            clock,
            store,
            ingestor,
            reconciler,
            dashboard,
            media_root: None,
        }
    }

    pub fn with_media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.media_root = Some(root.into());
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let media_root = state.media_root.clone();

    let router = Router::new()
        .merge(api::health_routes())
        .merge(api::ingest_routes())
        .merge(api::dashboard_routes())
        .with_state(state);

    let router = match media_root {
        Some(root) => router.nest_service("/media", ServeDir::new(root)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}
