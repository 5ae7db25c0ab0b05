//! Point-in-time access to cached historical series
//!
//! This module carries the temporal-correctness guarantees of the whole
//! backtest: a history query at virtual time T must never see a sample dated
//! after T, and must never silently return fewer samples than asked for.
//!
//! The driver calls [SeriesCache::history] hundreds of times per simulated
//! day across many indicators, so index resolution is accelerated by a
//! per-entry hint: when virtual time advances tick-by-tick, the next index is
//! almost always within a few positions of the last one, and the search is
//! amortized O(1). The hint is only an accelerator, every lookup validates
//! against the query instant.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::calendar::{session_back, CalendarError, TradingCalendar};
use crate::input::{Bar, DataField, FetchError, MarketDataSource, RetryPolicy};
use crate::types::{DateTime, Interval};

//Positions scanned backward from the hint before giving up on the fast path
const HINT_WINDOW: usize = 5;
//Wall-clock TTL for minute-interval entries
const MINUTE_TTL_SECS: i64 = 120;
//Extra leading samples fetched ahead of the requested span so indicator
//warm-up doesn't bleed into the returned window
pub const DAY_LOOKBACK_PAD: usize = 100;
pub const MINUTE_LOOKBACK_PAD: usize = 5;
//Invalidate-and-refetch attempts when the cached window turns out too narrow
const WINDOW_RETRIES: usize = 3;

/// How much history a query wants: the last `n` samples, or everything since
/// a date. A date span is well-defined even when the date itself is not a
/// trading day, it resolves through the same nearest-index mechanism.
#[derive(Clone, Copy, Debug)]
pub enum Span {
    Count(usize),
    Since(DateTime),
}

#[derive(Clone, Debug)]
pub enum SeriesError {
    /// The query instant predates every sample the source has. A genuine
    /// data gap the caller must handle, not retry.
    DataGap { at: DateTime },
    /// Repeated refetches could not produce a window wide enough for the
    /// requested span.
    WindowExhausted { symbol: String },
    Fetch(FetchError),
    Calendar(CalendarError),
}

impl Error for SeriesError {}

impl Display for SeriesError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SeriesError::DataGap { at } => {
                write!(f, "Datetime {} not found in historical data", i64::from(*at))
            }
            SeriesError::WindowExhausted { symbol } => {
                write!(f, "Could not fetch a wide enough window for {symbol}")
            }
            SeriesError::Fetch(err) => write!(f, "{err}"),
            SeriesError::Calendar(err) => write!(f, "{err}"),
        }
    }
}

impl From<FetchError> for SeriesError {
    fn from(err: FetchError) -> Self {
        SeriesError::Fetch(err)
    }
}

impl From<CalendarError> for SeriesError {
    fn from(err: CalendarError) -> Self {
        SeriesError::Calendar(err)
    }
}

/// Index of the latest sample at-or-before `query`, by full backward scan
/// from the end. A sample timestamped exactly at `query` is included: it is
/// the most recent known value, not future data.
pub fn nearest_idx(query: DateTime, timestamps: &[DateTime]) -> Result<usize, SeriesError> {
    for (idx, ts) in timestamps.iter().enumerate().rev() {
        if *ts <= query {
            return Ok(idx);
        }
    }
    Err(SeriesError::DataGap { at: query })
}

/// Same result as [nearest_idx] but anchored at a hint from the previous
/// resolution. Scans forward from a small window before the hint; falls back
/// to the full scan when the query sits before that window.
pub fn nearest_idx_from(
    query: DateTime,
    timestamps: &[DateTime],
    hint: usize,
) -> Result<usize, SeriesError> {
    if timestamps.is_empty() {
        return Err(SeriesError::DataGap { at: query });
    }
    let start = hint.min(timestamps.len() - 1).saturating_sub(HINT_WINDOW);
    if timestamps[start] > query {
        //Query is behind the window, e.g. virtual time jumped backward
        return nearest_idx(query, timestamps);
    }
    let mut found = start;
    for (idx, ts) in timestamps.iter().enumerate().skip(start + 1) {
        if *ts > query {
            break;
        }
        found = idx;
    }
    Ok(found)
}

/// Number of samples between `start`'s resolved index and `current_idx`,
/// inclusive of both. Zero when `start` resolves after `current_idx`.
pub fn date_to_length(
    start: DateTime,
    timestamps: &[DateTime],
    current_idx: usize,
) -> Result<usize, SeriesError> {
    let start_idx = nearest_idx(start, timestamps)?;
    if start_idx > current_idx {
        return Ok(0);
    }
    Ok(current_idx - start_idx + 1)
}

#[derive(Debug)]
struct CacheEntry {
    bars: Vec<Bar>,
    //Parallel to bars, strictly increasing
    timestamps: Vec<DateTime>,
    //Search accelerator only, never authoritative
    hint: usize,
    fetched_at: DateTime,
}

impl CacheEntry {
    fn is_stale(&self, interval: Interval, wall_now: DateTime) -> bool {
        match interval {
            Interval::Day => !wall_now.same_day(&self.fetched_at),
            Interval::Minute => *wall_now - *self.fetched_at > MINUTE_TTL_SECS,
        }
    }
}

/// Per (symbol, interval) memoized historical series with staleness-based
/// invalidation.
///
/// Owned exclusively by one backtest run. The hint-based search depends on
/// monotonic, non-interleaved time advancement, so a cache must never be
/// shared across concurrently running backtests.
pub struct SeriesCache {
    source: Box<dyn MarketDataSource>,
    calendar: Arc<dyn TradingCalendar + Send + Sync>,
    retry: RetryPolicy,
    entries: HashMap<(String, Interval), CacheEntry>,
}

enum Lookup {
    Slice(Vec<f64>),
    //Window too narrow or query behind window start: discard and refetch
    Refetch,
}

impl SeriesCache {
    pub fn new(
        source: Box<dyn MarketDataSource>,
        calendar: Arc<dyn TradingCalendar + Send + Sync>,
    ) -> Self {
        Self {
            source,
            calendar,
            retry: RetryPolicy::default(),
            entries: HashMap::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Series of `span` samples of `field` ending at-or-before `virtual_now`.
    ///
    /// Fetches on miss or staleness, resolves the current index through the
    /// hint path, and returns the half-open slice `[idx-length+1, idx+1)`.
    /// When the cached window cannot cover the span, the entry is discarded
    /// and refetched wider rather than returning a truncated result.
    pub fn history(
        &mut self,
        symbol: &str,
        span: Span,
        field: DataField,
        interval: Interval,
        virtual_now: DateTime,
        wall_now: DateTime,
    ) -> Result<Vec<f64>, SeriesError> {
        let key = (symbol.to_string(), interval);
        let mut widen = 1;
        let mut last_err = SeriesError::WindowExhausted {
            symbol: symbol.to_string(),
        };

        for _attempt in 0..WINDOW_RETRIES {
            let needs_fetch = match self.entries.get(&key) {
                None => true,
                Some(entry) => entry.is_stale(interval, wall_now),
            };
            if needs_fetch {
                let entry =
                    self.fetch_window(symbol, interval, span, virtual_now, wall_now, widen)?;
                self.entries.insert(key.clone(), entry);
            }

            let outcome = {
                let entry = self.entries.get_mut(&key).unwrap();
                match Self::lookup(entry, span, field, virtual_now) {
                    Ok(lookup) => lookup,
                    Err(err) => {
                        last_err = err;
                        Lookup::Refetch
                    }
                }
            };
            match outcome {
                Lookup::Slice(values) => return Ok(values),
                Lookup::Refetch => {
                    self.entries.remove(&key);
                    widen *= 2;
                }
            }
        }
        Err(last_err)
    }

    fn lookup(
        entry: &mut CacheEntry,
        span: Span,
        field: DataField,
        virtual_now: DateTime,
    ) -> Result<Lookup, SeriesError> {
        let idx = nearest_idx_from(virtual_now, &entry.timestamps, entry.hint)?;
        let length = match span {
            Span::Count(n) => n,
            Span::Since(date) => date_to_length(date, &entry.timestamps, idx)?,
        };
        if length == 0 {
            return Ok(Lookup::Slice(Vec::new()));
        }
        if idx + 1 < length {
            //The window wasn't fetched wide enough, a truncated slice would
            //be silently wrong
            return Ok(Lookup::Refetch);
        }
        entry.hint = idx;
        let values = entry.bars[idx + 1 - length..idx + 1]
            .iter()
            .map(|b| b.field(field))
            .collect();
        Ok(Lookup::Slice(values))
    }

    fn fetch_window(
        &mut self,
        symbol: &str,
        interval: Interval,
        span: Span,
        virtual_now: DateTime,
        wall_now: DateTime,
        widen: usize,
    ) -> Result<CacheEntry, SeriesError> {
        let pad = match interval {
            Interval::Day => DAY_LOOKBACK_PAD,
            Interval::Minute => MINUTE_LOOKBACK_PAD,
        } * widen;
        let count = match span {
            Span::Count(n) => n,
            Span::Since(date) => self
                .calendar
                .sessions(date.day_start(), virtual_now.day_start().add_days(1))
                .len()
                .max(1),
        };
        let start = match session_back(&*self.calendar, count + pad, virtual_now) {
            Ok(session) => session,
            //Calendar does not extend that far back, take everything it has
            Err(_) => virtual_now
                .day_start()
                .add_days(-((2 * (count + pad) + 5) as i64)),
        };
        let fetch_start = match interval {
            Interval::Day => start,
            //Minute data starts the prior day so the first session is fully
            //covered
            Interval::Minute => start.add_days(-1),
        };
        let fetch_end = wall_now.day_start().add_days(2);

        let bars = self
            .retry
            .fetch(&*self.source, symbol, interval, fetch_start, fetch_end)?;
        if bars.is_empty() {
            return Err(SeriesError::DataGap { at: virtual_now });
        }
        let timestamps: Vec<DateTime> = bars.iter().map(|b| DateTime::from(b.date)).collect();
        //Seed the hint with a full backward scan from the end
        let hint = nearest_idx(virtual_now, &timestamps)?;
        Ok(CacheEntry {
            bars,
            timestamps,
            hint,
            fetched_at: wall_now,
        })
    }
}
