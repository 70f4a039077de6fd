//! Daily trading session calendar.
//!
//! The market is closed every day over `[closed_from, closed_until)`. A session
//! opens at `closed_until` and runs until `closed_from` of the next calendar day.

use candles_core::config::SessionConfig;
use candles_core::Timestamp;
use chrono::{Days, NaiveTime, TimeZone, Utc};

/// Market-closed interval and the session boundaries derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCalendar {
    closed_from: NaiveTime,
    closed_until: NaiveTime,
}

impl SessionCalendar {
    /// Create a calendar. `closed_from` must precede `closed_until`.
    pub fn new(closed_from: NaiveTime, closed_until: NaiveTime) -> Self {
        Self {
            closed_from,
            closed_until,
        }
    }

    /// Calendar from configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.closed_from, config.closed_until)
    }

    /// True if `ts` falls inside the daily closed interval.
    #[inline]
    pub fn is_closed(&self, ts: Timestamp) -> bool {
        let t = ts.time();
        t >= self.closed_from && t < self.closed_until
    }

    /// Session open on the calendar date of `ts`.
    pub fn reopen_at(&self, ts: Timestamp) -> Timestamp {
        Utc.from_utc_datetime(&ts.date_naive().and_time(self.closed_until))
    }

    /// Open of the session that contains `ts`.
    ///
    /// Times before `closed_from` belong to the session that opened the previous
    /// calendar day.
    pub fn session_open(&self, ts: Timestamp) -> Timestamp {
        let date = ts.date_naive();
        let date = if ts.time() < self.closed_from {
            date.checked_sub_days(Days::new(1)).unwrap_or(date)
        } else {
            date
        };
        Utc.from_utc_datetime(&date.and_time(self.closed_until))
    }
}

impl Default for SessionCalendar {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}
