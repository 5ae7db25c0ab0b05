//! Generic types used across the package

use std::ops::Deref;

use serde::{Deserialize, Serialize};
use time::{format_description, Date, OffsetDateTime};

/// Resolution at which a backtest steps through time and logs snapshots. Also
/// used as the sample interval of historical series.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum Interval {
    Day,
    Minute,
}

pub const SECS_IN_DAY: i64 = 86_400;

/// Minute of day at which a session opens (09:30).
pub const SESSION_OPEN_MINUTE: i64 = 9 * 60 + 30;
/// Minute of day of the last minute bar of a session (15:59).
pub const SESSION_CUTOFF_MINUTE: i64 = 15 * 60 + 59;
/// Number of minute offsets in a standard 6.5-hour session, inclusive of the
/// 16:00 close.
pub const MINUTES_IN_SESSION: i64 = 391;

///[DateTime] is a wrapper around the epoch time as i64. This type also
///functions as a wrapper around the time package which offers some of the more
///useful datetime functionality required in the calendar and schedule modules.
//The internal representation with the time package should remain hidden from
//clients. Whilst this results in some duplication of the API, this retains the
//option to get rid of the dependency on time or change individual functions
//later.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct DateTime(i64);

impl DateTime {
    pub fn from_ymd(year: i32, month: u8, day: u8) -> Self {
        let month = time::Month::try_from(month).expect("invalid month");
        let date = Date::from_calendar_date(year, month, day).expect("invalid calendar date");
        Self::from(date.midnight().assume_utc().unix_timestamp())
    }

    pub fn from_date_string(val: &str, date_fmt: &str) -> Self {
        let format = format_description::parse(date_fmt).unwrap();
        let parsed_date = Date::parse(val, &format).unwrap();
        Self::from(parsed_date.midnight().assume_utc().unix_timestamp())
    }

    /// Midnight at the start of the same day.
    pub fn day_start(&self) -> Self {
        Self(self.0 - self.0.rem_euclid(SECS_IN_DAY))
    }

    /// Same day at the given hour and minute.
    pub fn with_hm(&self, hour: i64, minute: i64) -> Self {
        Self(*self.day_start() + hour * 3_600 + minute * 60)
    }

    /// Minutes elapsed since midnight.
    pub fn minute_of_day(&self) -> i64 {
        self.0.rem_euclid(SECS_IN_DAY) / 60
    }

    pub fn same_day(&self, other: &DateTime) -> bool {
        self.day_start() == other.day_start()
    }

    pub fn add_days(&self, days: i64) -> Self {
        Self(self.0 + days * SECS_IN_DAY)
    }

    pub fn add_minutes(&self, minutes: i64) -> Self {
        Self(self.0 + minutes * 60)
    }

    pub fn weekday(&self) -> time::Weekday {
        let date: OffsetDateTime = (*self).into();
        date.weekday()
    }

    pub fn now() -> Self {
        OffsetDateTime::now_utc().into()
    }
}

impl Deref for DateTime {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<OffsetDateTime> for DateTime {
    fn from(value: OffsetDateTime) -> Self {
        value.unix_timestamp().into()
    }
}

impl From<DateTime> for OffsetDateTime {
    fn from(v: DateTime) -> Self {
        if let Ok(date) = OffsetDateTime::from_unix_timestamp(i64::from(v)) {
            date
        } else {
            panic!("Tried to convert non-date value");
        }
    }
}

impl From<DateTime> for i64 {
    fn from(v: DateTime) -> Self {
        v.0
    }
}

impl From<i64> for DateTime {
    fn from(v: i64) -> Self {
        DateTime(v)
    }
}

/// Round to two decimal places. Cash and portfolio values are rounded after
/// every mutation so floating error cannot accumulate into an invariant
/// violation.
pub fn round2(val: f64) -> f64 {
    (val * 100.0).round() / 100.0
}

/// Round to three decimal places, used for displayed risk statistics.
pub fn round3(val: f64) -> f64 {
    (val * 1_000.0).round() / 1_000.0
}
