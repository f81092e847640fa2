//! Staggered re-merge scheduler
//!
//! Devices report late and out of order, so every key is merged again at
//! fixed distances behind the clock (by default 5 s, 5 min and 10 min). Each
//! tick works from one explicit `now`; seconds skipped by a slow tick are
//! caught up on the next one, bounded by `MAX_CATCH_UP_SECS`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tentwatch_common::time::{from_epoch, to_epoch, truncate_to_second};
use tentwatch_common::Clock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::Reconciler;

pub const DEFAULT_OFFSETS_SECS: [i64; 3] = [5, 300, 600];
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
const MAX_CATCH_UP_SECS: i64 = 60;

/// Distances behind `now` at which a second is re-merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSchedule {
    offsets: Vec<Duration>,
}

impl Default for ReconcileSchedule {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_OFFSETS_SECS)
    }
}

impl ReconcileSchedule {
    pub fn from_secs(offsets_secs: &[i64]) -> Self {
        let mut offsets: Vec<Duration> = offsets_secs
            .iter()
            .copied()
            .filter(|s| *s >= 0)
            .map(Duration::seconds)
            .collect();
        offsets.sort();
        offsets.dedup();
        Self { offsets }
    }

    /// Keys due at `now`, oldest offset last
    pub fn keys_for(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let now = truncate_to_second(now);
        self.offsets.iter().map(|offset| now - *offset).collect()
    }
}

/// Seconds a tick at `now` is responsible for, given the last second handled
pub fn seconds_due(last: Option<i64>, now: i64) -> Vec<i64> {
    match last {
        None => vec![now],
        Some(last) if now <= last => Vec::new(),
        Some(last) => {
            let first = (last + 1).max(now - MAX_CATCH_UP_SECS + 1);
            (first..=now).collect()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub keys: usize,
    pub written: usize,
    pub failed: usize,
}

pub struct ReconcileScheduler {
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
    schedule: ReconcileSchedule,
    tick_interval: StdDuration,
    last_second: Mutex<Option<i64>>,
}

impl ReconcileScheduler {
    pub fn new(reconciler: Arc<Reconciler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            reconciler,
            clock,
            schedule: ReconcileSchedule::default(),
            tick_interval: StdDuration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            last_second: Mutex::new(None),
        }
    }

    pub fn with_schedule(mut self, schedule: ReconcileSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_tick_interval(mut self, interval: StdDuration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Run one tick against the injected clock
    pub async fn tick(&self) -> TickSummary {
        let now = self.clock.now();
        self.tick_at(now).await
    }

    /// Run one tick as of `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickSummary {
        let now_secs = to_epoch(truncate_to_second(now));
        let seconds = {
            let mut last = self.last_second.lock().await;
            let due = seconds_due(*last, now_secs);
            if let Some(latest) = due.last() {
                *last = Some(*latest);
            }
            due
        };

        let mut summary = TickSummary::default();
        for second in seconds {
            let Ok(second) = from_epoch(second) else {
                continue;
            };
            for key in self.schedule.keys_for(second) {
                summary.keys += 1;
                match self.reconciler.merge_second(key).await {
                    Ok(merged) => {
                        summary.written += merged.created + merged.updated;
                        summary.failed += merged.failed;
                    }
                    Err(e) => {
                        summary.failed += 1;
                        warn!(key = %key, error = %e, "Scheduled merge failed");
                    }
                }
            }
        }

        if summary.written > 0 || summary.failed > 0 {
            debug!(
                keys = summary.keys,
                written = summary.written,
                failed = summary.failed,
                "Reconcile tick"
            );
        }
        summary
    }

    /// Start ticking in the background until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let offsets: Vec<i64> = self.schedule.offsets.iter().map(|o| o.num_seconds()).collect();
            info!(
                tick_interval_ms = self.tick_interval.as_millis() as u64,
                ?offsets,
                "Reconcile scheduler started"
            );

            let mut interval = tokio::time::interval(self.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Reconcile scheduler stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
        })
    }
}
