//! Determines when a strategy's `run` callback fires
//!
//! A [RunSchedule] is a set of minute-of-day triggers. The backtest driver
//! only ever asks "does the schedule fire at this instant" and "when is the
//! next fire at-or-after this instant"; the cron-style grammar is a
//! construction convenience, not part of the driver contract.

use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::types::DateTime;

#[derive(Clone, Debug)]
pub enum ScheduleError {
    BadCron(String),
}

impl Error for ScheduleError {}

impl Display for ScheduleError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ScheduleError::BadCron(expr) => write!(f, "Could not parse cron expression: {expr}"),
        }
    }
}

/// Ordered set of minute-of-day triggers.
#[derive(Clone, Debug)]
pub struct RunSchedule {
    //Minutes since midnight, sorted and deduplicated
    minutes: Vec<i64>,
}

impl RunSchedule {
    pub fn from_times(times: &[(i64, i64)]) -> Self {
        let mut minutes: Vec<i64> = times.iter().map(|(h, m)| h * 60 + m).collect();
        minutes.sort();
        minutes.dedup();
        Self { minutes }
    }

    /// Parse a `"M H * * *"` cron-style expression. Only fixed minute and
    /// hour fields are meaningful for a trading schedule, the day fields are
    /// accepted and ignored because the trading calendar decides which days
    /// exist.
    pub fn from_cron(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::BadCron(expr.to_string()));
        }
        let minute: i64 = fields[0]
            .parse()
            .map_err(|_| ScheduleError::BadCron(expr.to_string()))?;
        let hour: i64 = fields[1]
            .parse()
            .map_err(|_| ScheduleError::BadCron(expr.to_string()))?;
        if !(0..60).contains(&minute) || !(0..24).contains(&hour) {
            return Err(ScheduleError::BadCron(expr.to_string()));
        }
        Ok(Self::from_times(&[(hour, minute)]))
    }

    /// Union of several cron expressions, mirroring a scheduler built from a
    /// list of triggers.
    pub fn from_crons(exprs: &[&str]) -> Result<Self, ScheduleError> {
        let mut minutes = Vec::new();
        for expr in exprs {
            minutes.extend(Self::from_cron(expr)?.minutes);
        }
        minutes.sort();
        minutes.dedup();
        Ok(Self { minutes })
    }

    pub fn fires_at(&self, instant: DateTime) -> bool {
        self.minutes.binary_search(&instant.minute_of_day()).is_ok()
    }

    /// First trigger at-or-after `instant`, `None` when the schedule holds no
    /// triggers at all. Rolls over to the next day's first trigger when
    /// `instant` is past the last trigger of its day.
    pub fn next_fire(&self, instant: DateTime) -> Option<DateTime> {
        let minute = instant.minute_of_day();
        for trigger in &self.minutes {
            if *trigger >= minute {
                return Some(instant.day_start().add_minutes(*trigger));
            }
        }
        let first = self.minutes.first()?;
        Some(instant.day_start().add_days(1).add_minutes(*first))
    }
}

impl Default for RunSchedule {
    /// One run at the 09:30 session open.
    fn default() -> Self {
        Self::from_times(&[(9, 30)])
    }
}
