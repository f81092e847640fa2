//! Occupancy arithmetic over counter history
//!
//! Pure functions; the queries live in `counter_history`.

use chrono::{DateTime, Duration, Utc};

use crate::db::counter_history::FlowSample;

pub const DEFAULT_INTERVAL_MINUTES: i64 = 5;

/// Entry/exit totals with exits capped at entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub total_in: i64,
    pub total_out: i64,
    pub current_staying: i64,
}

impl Occupancy {
    pub fn from_totals(total_in: i64, total_out: i64) -> Self {
        let total_out = total_out.min(total_in);
        Self {
            total_in,
            total_out,
            current_staying: total_in - total_out,
        }
    }
}

/// Share of capacity in use, two decimals, half away from zero; 0 without capacity
pub fn occupancy_percentage(staying: i64, capacity: i64) -> f64 {
    if capacity <= 0 {
        return 0.0;
    }
    let ratio = staying as f64 / capacity as f64 * 100.0;
    (ratio * 100.0).round() / 100.0
}

/// Labels `start, start + step, ...` up to and including `end`
pub fn bucket_labels(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
) -> Vec<DateTime<Utc>> {
    let mut labels = Vec::new();
    if step <= Duration::zero() {
        return labels;
    }
    let mut current = start;
    while current <= end {
        labels.push(current);
        current += step;
    }
    labels
}

/// Running occupancy at each label.
///
/// The first value is `initial`. Each later value adds the net flow of
/// samples whose end time falls in `[labels[k-1], labels[k])`, so a sample
/// exactly on a label counts toward the bucket that starts there.
/// `samples` must be sorted by `end_time`.
pub fn running_series(initial: i64, labels: &[i64], samples: &[FlowSample]) -> (Vec<i64>, usize) {
    let mut series = Vec::with_capacity(labels.len());
    if labels.is_empty() {
        return (series, 0);
    }

    let mut current = initial;
    let mut counted = 0;
    let mut next = samples.partition_point(|s| s.end_time < labels[0]);
    series.push(current);

    for window in labels.windows(2) {
        let bucket_end = window[1];
        while let Some(sample) = samples.get(next) {
            if sample.end_time >= bucket_end {
                break;
            }
            current += sample.total_in - sample.total_out;
            counted += 1;
            next += 1;
        }
        series.push(current);
    }

    (series, counted)
}
