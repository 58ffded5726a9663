//! Time source and local-calendar helpers.
//!
//! Durations are always recomputed from stored timestamps, so the only thing
//! the engine needs from a clock is "now".

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Calendar date of `instant` in the local calendar.
pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// The instant the local calendar day `date` ends (next local midnight).
pub fn day_end(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let next = date.succ_opt().unwrap_or(date);
    let midnight = next.and_time(NaiveTime::MIN);
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| {
            Utc.from_utc_datetime(&midnight) - Duration::seconds(offset.local_minus_utc() as i64)
        })
}

pub fn hours(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 3_600_000.0
}

#[cfg(test)]
pub use manual::ManualClock;
