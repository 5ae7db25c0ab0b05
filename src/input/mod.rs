//! Historical price sources consumed by the series cache
//!
//! The cache only needs one shape from a data provider: a table of per-sample
//! bars in stable timestamp order over a requested range. Everything else
//! (files, HTTP, synthetic generation) hides behind [MarketDataSource].

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::warn;
use rand::thread_rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::types::{DateTime, Interval};

/// One OHLCV sample. `date` is the epoch-second timestamp of the sample.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Bar {
    pub date: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn field(&self, field: DataField) -> f64 {
        match field {
            DataField::Open => self.open,
            DataField::High => self.high,
            DataField::Low => self.low,
            DataField::Close => self.close,
            DataField::Volume => self.volume,
        }
    }
}

/// Which column of a bar a history query reads.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

#[derive(Clone, Debug)]
pub enum FetchError {
    /// Provider hiccup, worth retrying.
    Transient(String),
    /// The provider has no data at all for this symbol/interval.
    UnknownSymbol(String),
    /// The bounded retry policy gave up.
    Exhausted { symbol: String, attempts: u32 },
}

impl Error for FetchError {}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            FetchError::Transient(msg) => write!(f, "Transient fetch failure: {msg}"),
            FetchError::UnknownSymbol(symbol) => write!(f, "No data for symbol {symbol}"),
            FetchError::Exhausted { symbol, attempts } => {
                write!(f, "Fetch for {symbol} failed after {attempts} attempts")
            }
        }
    }
}

/// Source of historical bars.
///
/// Implementations must return bars in strictly increasing timestamp order
/// over the half-open range `[start, end)`. Fetch calls are blocking from the
/// driver's perspective.
pub trait MarketDataSource: Send {
    fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime,
        end: DateTime,
    ) -> Result<Vec<Bar>, FetchError>;
}

/// Bounded retry with fixed backoff for transient provider failures.
///
/// Historical-data providers have intermittent availability so transient
/// failures are retried rather than surfaced to the strategy. Unlike the
/// retry-forever loop this replaces, the budget is bounded: a persistently
/// down source fails the run with [FetchError::Exhausted] instead of hanging
/// it.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn fetch(
        &self,
        source: &dyn MarketDataSource,
        symbol: &str,
        interval: Interval,
        start: DateTime,
        end: DateTime,
    ) -> Result<Vec<Bar>, FetchError> {
        let mut attempt = 0;
        loop {
            match source.fetch(symbol, interval, start, end) {
                Ok(bars) => return Ok(bars),
                Err(FetchError::Transient(msg)) => {
                    attempt += 1;
                    if attempt >= self.attempts {
                        return Err(FetchError::Exhausted {
                            symbol: symbol.to_string(),
                            attempts: attempt,
                        });
                    }
                    warn!("Trying to fetch historical data for {symbol}: {msg}");
                    thread::sleep(self.backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(5),
        }
    }
}

/// In-memory source backed by explicitly inserted bars. The workhorse for
/// tests and for replaying data already pulled from a remote provider.
#[derive(Debug, Default)]
pub struct FixedDataSource {
    inner: HashMap<(String, Interval), Vec<Bar>>,
}

impl FixedDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bar(&mut self, symbol: impl Into<String>, interval: Interval, bar: Bar) {
        let series = self.inner.entry((symbol.into(), interval)).or_default();
        series.push(bar);
        series.sort_by_key(|b| b.date);
    }

    /// Insert a flat day bar where every field carries the same price.
    pub fn add_price(&mut self, symbol: impl Into<String>, date: DateTime, price: f64) {
        self.add_bar(
            symbol,
            Interval::Day,
            Bar {
                date: *date,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 0.0,
            },
        );
    }
}

impl MarketDataSource for FixedDataSource {
    fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime,
        end: DateTime,
    ) -> Result<Vec<Bar>, FetchError> {
        let series = self
            .inner
            .get(&(symbol.to_string(), interval))
            .ok_or_else(|| FetchError::UnknownSymbol(symbol.to_string()))?;
        Ok(series
            .iter()
            .filter(|b| b.date >= *start && b.date < *end)
            .cloned()
            .collect())
    }
}

/// Source backed by one CSV file per symbol with
/// `date,open,high,low,close,volume` columns, date in epoch seconds.
#[derive(Debug, Default)]
pub struct CsvDataSource {
    files: HashMap<String, PathBuf>,
}

impl CsvDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, symbol: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.insert(symbol.into(), path.into());
        self
    }
}

impl MarketDataSource for CsvDataSource {
    fn fetch(
        &self,
        symbol: &str,
        _interval: Interval,
        start: DateTime,
        end: DateTime,
    ) -> Result<Vec<Bar>, FetchError> {
        let path = self
            .files
            .get(symbol)
            .ok_or_else(|| FetchError::UnknownSymbol(symbol.to_string()))?;
        let mut rdr = csv::Reader::from_path(path)
            .map_err(|err| FetchError::Transient(err.to_string()))?;
        let mut bars = Vec::new();
        for row in rdr.deserialize::<Bar>() {
            let bar = row.map_err(|err| FetchError::Transient(err.to_string()))?;
            if bar.date >= *start && bar.date < *end {
                bars.push(bar);
            }
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }
}

/// Build a source with a Gaussian random-walk day series for each symbol,
/// starting at 100.0. Used by benches and scenario tests that don't care
/// about the exact path.
pub fn random_source_generator(symbols: &[&str], sessions: &[DateTime]) -> FixedDataSource {
    let mut rng = thread_rng();
    let dist = Normal::new(0.0, 1.0).unwrap();
    let mut source = FixedDataSource::new();
    for symbol in symbols {
        let mut price: f64 = 100.0;
        for session in sessions {
            price = (price + dist.sample(&mut rng)).max(1.0);
            source.add_bar(
                *symbol,
                Interval::Day,
                Bar {
                    date: *session.with_hm(16, 0),
                    open: price,
                    high: price + 1.0,
                    low: (price - 1.0).max(0.5),
                    close: price,
                    volume: 1_000.0,
                },
            );
        }
    }
    source
}
