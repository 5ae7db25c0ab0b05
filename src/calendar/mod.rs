//! Provides the universe of valid trading sessions
//!
//! All conversions between a logical length ("the last n sessions") and a real
//! date range go through a [TradingCalendar]. The calendar is a pluggable
//! provider: the library ships a weekday approximation and a fixed-list
//! implementation for replay and tests, a client with access to an exchange
//! calendar feed can supply its own.

use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::types::DateTime;

#[derive(Clone, Debug)]
pub enum CalendarError {
    /// The padded lookup window did not contain enough sessions to satisfy an
    /// n-sessions-before/after query.
    WindowExhausted { wanted: usize, got: usize },
}

impl Error for CalendarError {}

impl Display for CalendarError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CalendarError::WindowExhausted { wanted, got } => {
                write!(
                    f,
                    "Calendar window exhausted: wanted {wanted} sessions, window held {got}"
                )
            }
        }
    }
}

/// Source of valid trading sessions.
///
/// Sessions are returned as midnight-anchored [DateTime] values in strictly
/// increasing order over the half-open interval `[start, end)`.
pub trait TradingCalendar {
    fn sessions(&self, start: DateTime, end: DateTime) -> Vec<DateTime>;
}

//Sessions-before/after queries request a padded window of calendar days so
//that weekends and holiday clusters cannot leave the window short. The pad is
//generous rather than exact: the cost of a few extra sessions in the response
//is nothing next to a failed conversion mid-backtest.
fn padded_days(n: usize) -> i64 {
    (2 * n + 5) as i64
}

/// The session `n` sessions before `end`. `n == 1` resolves to the most
/// recent session at-or-before `end`.
pub fn session_back(
    calendar: &dyn TradingCalendar,
    n: usize,
    end: DateTime,
) -> Result<DateTime, CalendarError> {
    let window_start = end.day_start().add_days(-padded_days(n));
    //End is inclusive for backward queries, the current session counts as the
    //first one back
    let sessions = calendar.sessions(window_start, end.day_start().add_days(1));
    if sessions.len() < n {
        return Err(CalendarError::WindowExhausted {
            wanted: n,
            got: sessions.len(),
        });
    }
    Ok(sessions[sessions.len() - n])
}

/// The session `n` sessions after `start`.
pub fn session_forward(
    calendar: &dyn TradingCalendar,
    start: DateTime,
    n: usize,
) -> Result<DateTime, CalendarError> {
    let window_end = start.day_start().add_days(padded_days(n));
    let sessions = calendar.sessions(start.day_start(), window_end);
    if sessions.len() <= n {
        return Err(CalendarError::WindowExhausted {
            wanted: n + 1,
            got: sessions.len(),
        });
    }
    Ok(sessions[n])
}

/// Calendar that treats every weekday as a session. Good enough for synthetic
/// data and for exchanges whose holiday table the client does not have.
pub struct WeekdayCalendar;

impl TradingCalendar for WeekdayCalendar {
    fn sessions(&self, start: DateTime, end: DateTime) -> Vec<DateTime> {
        let mut out = Vec::new();
        let mut day = start.day_start();
        while day < end {
            match day.weekday() {
                time::Weekday::Saturday | time::Weekday::Sunday => (),
                _ => out.push(day),
            }
            day = day.add_days(1);
        }
        out
    }
}

/// Calendar backed by an explicit session list, used for tests and for
/// replaying a range whose sessions were fetched from an external provider.
pub struct FixedCalendar {
    sessions: Vec<DateTime>,
}

impl FixedCalendar {
    pub fn new(mut sessions: Vec<DateTime>) -> Self {
        sessions.sort();
        Self { sessions }
    }
}

impl TradingCalendar for FixedCalendar {
    fn sessions(&self, start: DateTime, end: DateTime) -> Vec<DateTime> {
        self.sessions
            .iter()
            .filter(|s| **s >= start && **s < end)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{session_back, session_forward, FixedCalendar, TradingCalendar, WeekdayCalendar};
    use crate::types::DateTime;

    #[test]
    fn test_that_weekday_calendar_skips_weekends() {
        //2021-09-30 is a Thursday
        let start = DateTime::from_ymd(2021, 9, 30);
        //Half-open window Thu through Mon: Thu, Fri, Mon
        let sessions = WeekdayCalendar.sessions(start, start.add_days(5));
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[2], DateTime::from_ymd(2021, 10, 4));
    }

    #[test]
    fn test_that_session_back_counts_from_the_end() {
        let end = DateTime::from_ymd(2021, 10, 5);
        //1 back is the session itself, 2 back is the previous session
        assert_eq!(session_back(&WeekdayCalendar, 1, end).unwrap(), end);
        assert_eq!(
            session_back(&WeekdayCalendar, 2, end).unwrap(),
            DateTime::from_ymd(2021, 10, 4)
        );
        //Crossing the weekend
        assert_eq!(
            session_back(&WeekdayCalendar, 3, end).unwrap(),
            DateTime::from_ymd(2021, 10, 1)
        );
    }

    #[test]
    fn test_that_session_forward_counts_from_the_start() {
        let start = DateTime::from_ymd(2021, 10, 1);
        assert_eq!(session_forward(&WeekdayCalendar, start, 0).unwrap(), start);
        //Friday + 1 session crosses the weekend
        assert_eq!(
            session_forward(&WeekdayCalendar, start, 1).unwrap(),
            DateTime::from_ymd(2021, 10, 4)
        );
    }

    #[test]
    fn test_that_fixed_calendar_window_is_half_open() {
        let sessions: Vec<DateTime> = (0..5)
            .map(|i| DateTime::from_ymd(2021, 10, 4).add_days(i))
            .collect();
        let cal = FixedCalendar::new(sessions);
        let got = cal.sessions(
            DateTime::from_ymd(2021, 10, 4),
            DateTime::from_ymd(2021, 10, 6),
        );
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn test_that_exhausted_window_is_an_error() {
        let cal = FixedCalendar::new(vec![DateTime::from_ymd(2021, 10, 4)]);
        assert!(session_back(&cal, 5, DateTime::from_ymd(2021, 10, 5)).is_err());
    }
}
