//! Timestamp utilities
//!
//! Every instant is stored as UTC epoch seconds. Sites report and display in a
//! fixed civil offset (UTC+3 for the Mina/Arafat camps, no daylight saving),
//! so the zone is a [`FixedOffset`] rather than a tz database entry.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc,
};
use std::sync::Mutex;

use crate::{Error, Result};

/// Default site offset: UTC+3 (Asia/Riyadh)
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 180;

/// Naive layouts accepted from devices and dashboards. Tried in order.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Source of "now" for reconciliation and aggregation.
///
/// Handlers and the scheduler never read the wall clock directly; they ask the
/// clock held in application state, which tests replace with [`FixedClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Civil time zone of a site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteZone {
    offset: FixedOffset,
}

impl Default for SiteZone {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60).unwrap_or(Utc.fix()),
        }
    }
}

impl SiteZone {
    /// Build a zone from an offset east of UTC in minutes.
    pub fn from_offset_minutes(minutes: i32) -> Result<Self> {
        FixedOffset::east_opt(minutes * 60)
            .map(|offset| Self { offset })
            .ok_or_else(|| Error::Config(format!("UTC offset out of range: {} minutes", minutes)))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Interpret a zone-less civil time as site-local.
    ///
    /// Fails for civil times whose UTC instant falls outside chrono's range.
    pub fn localize(&self, naive: NaiveDateTime) -> Result<DateTime<FixedOffset>> {
        let utc = naive
            .checked_sub_signed(Duration::seconds(i64::from(self.offset.local_minus_utc())))
            .ok_or_else(|| Error::InvalidInput(format!("timestamp out of range: {}", naive)))?;
        Ok(DateTime::from_naive_utc_and_offset(utc, self.offset))
    }

    /// Render an instant in site-local time
    pub fn to_local(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset)
    }

    /// Parse an ISO-8601 timestamp.
    ///
    /// Accepts an explicit offset (`Z`, `+03:00`, `+0300`) or none, with either
    /// `T` or a space between date and time. Zone-less input is site-local.
    /// A bare date means local midnight.
    pub fn parse_timestamp(&self, raw: &str) -> Result<DateTime<Utc>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidInput("timestamp is empty".to_string()));
        }

        if let Some(parsed) = parse_with_offset(raw) {
            return Ok(parsed);
        }

        // A '+' in a query string arrives decoded as a space
        if raw.contains('T') && raw.matches(' ').count() == 1 {
            if let Some(parsed) = parse_with_offset(&raw.replacen(' ', "+", 1)) {
                return Ok(parsed);
            }
        }

        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Ok(self.localize(naive)?.with_timezone(&Utc));
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(self.localize(date.and_time(NaiveTime::MIN))?.with_timezone(&Utc));
        }

        Err(Error::InvalidInput(format!("unrecognized timestamp: {}", raw)))
    }

    /// Parse a device timestamp and drop its sub-second part.
    ///
    /// The result is the reconciliation key for the event.
    pub fn normalize_event_timestamp(&self, raw: &str) -> Result<DateTime<Utc>> {
        self.parse_timestamp(raw).map(truncate_to_second)
    }

    /// Local midnight of the day containing `now`, as UTC
    pub fn start_of_local_day(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = self.to_local(now).date_naive().and_time(NaiveTime::MIN);
        self.localize(midnight)
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or(now)
    }

    /// "Live" dashboard window: local midnight through `now`
    pub fn live_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start_of_local_day(now), now)
    }
}

fn parse_with_offset(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    None
}

/// Drop sub-second precision
pub fn truncate_to_second(instant: DateTime<Utc>) -> DateTime<Utc> {
    from_epoch(instant.timestamp()).unwrap_or(instant)
}

/// Storage representation: UTC epoch seconds
pub fn to_epoch(instant: DateTime<Utc>) -> i64 {
    instant.timestamp()
}

pub fn from_epoch(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::InvalidInput(format!("epoch seconds out of range: {}", secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn riyadh() -> SiteZone {
        SiteZone::default()
    }

    #[test]
    fn test_default_zone_is_utc_plus_three() {
        assert_eq!(riyadh().offset().local_minus_utc(), 3 * 3600);
    }

    #[test]
    fn test_naive_timestamp_is_site_local() {
        let parsed = riyadh().parse_timestamp("2025-06-05T12:00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_space_separator_accepted() {
        let parsed = riyadh().parse_timestamp("2025-06-05 12:00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_explicit_offset_wins_over_site_zone() {
        let parsed = riyadh().parse_timestamp("2025-06-05T12:00:00Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 5, 12, 0, 0).unwrap());

        let parsed = riyadh().parse_timestamp("2025-06-05T12:00:00+0100").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 5, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_query_string_plus_decoded_as_space() {
        let parsed = riyadh().parse_timestamp("2025-06-05T12:00:00 03:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_bare_date_is_local_midnight() {
        let parsed = riyadh().parse_timestamp("2025-06-05").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 4, 21, 0, 0).unwrap());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            riyadh().parse_timestamp("yesterday"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(riyadh().parse_timestamp("  "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_local_time_before_utc_range_rejected() {
        for raw in ["-262143-01-01T00:00:00", "-262143-01-01 00:00:00", "-262143-01-01"] {
            assert!(
                matches!(riyadh().parse_timestamp(raw), Err(Error::InvalidInput(_))),
                "{} should be rejected",
                raw
            );
        }
        assert!(riyadh().normalize_event_timestamp("-262143-01-01T00:00:00").is_err());
    }

    #[test]
    fn test_normalize_truncates_subseconds() {
        let parsed = riyadh()
            .normalize_event_timestamp("2025-06-05T12:00:07.987654+03:00")
            .unwrap();
        assert_eq!(parsed.nanosecond(), 0);
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 5, 9, 0, 7).unwrap());
    }

    #[test]
    fn test_start_of_local_day_crosses_utc_date() {
        // 22:30 UTC on the 4th is 01:30 local on the 5th
        let now = Utc.with_ymd_and_hms(2025, 6, 4, 22, 30, 0).unwrap();
        let start = riyadh().start_of_local_day(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 6, 4, 21, 0, 0).unwrap());

        let (window_start, window_end) = riyadh().live_window(now);
        assert_eq!(window_start, start);
        assert_eq!(window_end, now);
    }

    #[test]
    fn test_to_local_renders_offset() {
        let instant = Utc.with_ymd_and_hms(2025, 6, 5, 9, 0, 0).unwrap();
        assert_eq!(riyadh().to_local(instant).to_rfc3339(), "2025-06-05T12:00:00+03:00");
    }

    #[test]
    fn test_offset_out_of_range() {
        assert!(SiteZone::from_offset_minutes(25 * 60).is_err());
        assert!(SiteZone::from_offset_minutes(-300).is_ok());
    }

    #[test]
    fn test_epoch_round_trip_is_exact_for_whole_seconds() {
        let instant = Utc.with_ymd_and_hms(2025, 6, 5, 9, 0, 0).unwrap();
        assert_eq!(from_epoch(to_epoch(instant)).unwrap(), instant);
    }

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 6, 5, 9, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now(), start + Duration::seconds(5));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
