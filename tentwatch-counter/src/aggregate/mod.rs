//! Dashboard aggregation
//!
//! Two independent read paths:
//! - counter history (people counters): occupancy snapshot and series
//! - reconciled records: violation dashboard and record listing
//!
//! Neither path reads the other's table.

pub mod counter_history;
pub mod occupancy;
pub mod pilgrims;
pub mod scope;

use std::sync::Arc;

use sqlx::SqlitePool;
use tentwatch_common::SiteZone;

use crate::media::EvidenceStore;

pub use counter_history::{SiteOccupancy, SiteSeries};
pub use pilgrims::{Indicator, PilgrimView, SiteViolations, DEFAULT_RECORD_LIMIT};
pub use scope::{resolve_sites, TenantScope};

/// Read-side service shared by the dashboard handlers
pub struct Dashboard {
    db: SqlitePool,
    zone: SiteZone,
    store: Arc<dyn EvidenceStore>,
}

impl Dashboard {
    pub fn new(db: SqlitePool, zone: SiteZone, store: Arc<dyn EvidenceStore>) -> Self {
        Self { db, zone, store }
    }
}
