//! Clock sources and calendar decomposition
//!
//! The meter reads two clocks:
//!
//! - a **monotonic** millisecond counter since boot, used for elapsed-time and
//!   scheduling. It is a `u32` and wraps; all arithmetic on it goes through
//!   [`elapsed_ms`] (wrapping subtraction), never through signed comparison.
//! - a **wall clock** in Unix seconds, used only to find calendar boundaries.
//!   It may be unsynchronised (reported as `0`) and may jump.

use chrono::{DateTime, Datelike, FixedOffset};

/// Wall-clock values before 2020-01-01T00:00:00Z are treated as "not synchronised"
pub const MIN_VALID_UNIX_SECS: i64 = 1_577_836_800;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Milliseconds since boot
pub trait MonotonicClock {
    fn now_ms(&self) -> u32;
}

/// Calendar time in Unix seconds, `0` while unavailable
pub trait WallClock {
    fn now_unix(&self) -> i64;
}

impl<T: MonotonicClock + ?Sized> MonotonicClock for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

impl<T: WallClock + ?Sized> WallClock for &T {
    fn now_unix(&self) -> i64 {
        (**self).now_unix()
    }
}

/// Milliseconds from `since` to `now`, correct across one counter wrap
pub const fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

pub fn ms_to_hours(ms: u32) -> f64 {
    ms as f64 / MS_PER_HOUR
}

/// Local calendar position of a wall-clock reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarStamp {
    pub year: i32,
    /// Zero based day of the year (0..=365)
    pub day_of_year: u16,
    /// Month of the year (1..=12)
    pub month: u8,
}

impl CalendarStamp {
    pub const fn new(year: i32, day_of_year: u16, month: u8) -> Self {
        Self {
            year,
            day_of_year,
            month,
        }
    }

    /// Decompose a Unix timestamp in the given timezone.
    ///
    /// Returns `None` when the clock is not synchronised (epoch zero or any value
    /// before [`MIN_VALID_UNIX_SECS`]) or the offset is not representable.
    pub fn from_unix(secs: i64, utc_offset_secs: i32) -> Option<Self> {
        if secs < MIN_VALID_UNIX_SECS {
            return None;
        }

        let offset = FixedOffset::east_opt(utc_offset_secs)?;
        let local = DateTime::from_timestamp(secs, 0)?.with_timezone(&offset);

        Some(Self {
            year: local.year(),
            day_of_year: local.ordinal0() as u16,
            month: local.month() as u8,
        })
    }

    /// Fixed-width week bucket: `day_of_year / 7 + year * 52`.
    ///
    /// This is not an ISO week number. The last one or two days of a year land
    /// in bucket 52, which equals bucket 0 of the following year.
    pub const fn week_bucket(&self) -> i32 {
        self.day_of_year as i32 / 7 + self.year * 52
    }
}
