//! The user-supplied unit of behavior
//!
//! A strategy is a plain object implementing [Algorithm]; everything it can
//! observe or do goes through the [Context] injected into `initialize` and
//! `run`. The driver (backtest today, a live runner tomorrow) is the thing
//! satisfying `quote`/`history`/`order`, so the same strategy code runs
//! unchanged in either mode. No base-class juggling, just composition.

use crate::calendar::TradingCalendar;
use crate::indicator;
use crate::input::DataField;
use crate::portfolio::{OrderEvent, OrderKind, Portfolio};
use crate::schedule::RunSchedule;
use crate::series::{SeriesCache, SeriesError, Span};
use crate::types::{DateTime, Interval, SESSION_CUTOFF_MINUTE, SESSION_OPEN_MINUTE};

/// Rule-based trading strategy.
///
/// `run` fires on the schedule the strategy declares; an `Err` from one
/// invocation is logged by the driver and the simulation continues, so a
/// strategy can freely propagate indicator or data errors with `?`.
pub trait Algorithm: Send {
    fn initialize(&mut self, _ctx: &mut Context) {}

    fn run(&mut self, ctx: &mut Context) -> anyhow::Result<()>;

    /// When `run` fires. Defaults to once per session at the open.
    fn schedule(&self) -> RunSchedule {
        RunSchedule::default()
    }

    /// Benchmark symbol for the risk statistics.
    fn benchmark(&self) -> String {
        "SPY".to_string()
    }
}

/// Moving-average flavor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MaType {
    Simple,
    Exponential,
}

/// The strategy's window onto the simulation: point-in-time data access and
/// order placement against the portfolio, all pinned to the driver's current
/// virtual instant.
pub struct Context<'a> {
    virtual_now: DateTime,
    wall_now: DateTime,
    granularity: Interval,
    cache: &'a mut SeriesCache,
    portfolio: &'a mut Portfolio,
    calendar: &'a (dyn TradingCalendar + Send + Sync),
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        virtual_now: DateTime,
        wall_now: DateTime,
        granularity: Interval,
        cache: &'a mut SeriesCache,
        portfolio: &'a mut Portfolio,
        calendar: &'a (dyn TradingCalendar + Send + Sync),
    ) -> Self {
        Self {
            virtual_now,
            wall_now,
            granularity,
            cache,
            portfolio,
            calendar,
        }
    }

    /// The instant the strategy is running at.
    pub fn now(&self) -> DateTime {
        self.virtual_now
    }

    pub fn cash(&self) -> f64 {
        self.portfolio.cash()
    }

    pub fn value(&self) -> f64 {
        self.portfolio.value()
    }

    pub fn position(&self, symbol: &str) -> i64 {
        self.portfolio.position(symbol)
    }

    pub fn held_symbols(&self) -> Vec<String> {
        self.portfolio.holdings().keys().cloned().collect()
    }

    /// Current price of a symbol at the virtual instant. A backtest has no
    /// tick stream, so this is a deterministic bar-based approximation:
    /// before the session open it is the day's opening price, at or after the
    /// late-session cutoff the day's close, and otherwise the most recent
    /// close at the logging granularity.
    pub fn quote(&mut self, symbol: &str) -> Result<f64, SeriesError> {
        let minute = self.virtual_now.minute_of_day();
        let (field, interval) = if minute <= SESSION_OPEN_MINUTE {
            (DataField::Open, Interval::Day)
        } else if minute >= SESSION_CUTOFF_MINUTE {
            (DataField::Close, Interval::Day)
        } else {
            (DataField::Close, self.granularity)
        };
        let hist = self.history(symbol, Span::Count(1), field, interval)?;
        Ok(hist[0])
    }

    /// Historical values of `field` ending at-or-before the virtual instant.
    pub fn history(
        &mut self,
        symbol: &str,
        span: Span,
        field: DataField,
        interval: Interval,
    ) -> Result<Vec<f64>, SeriesError> {
        self.cache
            .history(symbol, span, field, interval, self.virtual_now, self.wall_now)
    }

    //Indicator lengths must be integer counts so each indicator can pad its
    //own warm-up; a date span converts through the session calendar
    fn span_to_len(&self, span: Span) -> usize {
        match span {
            Span::Count(n) => n,
            Span::Since(date) => self
                .calendar
                .sessions(date.day_start(), self.virtual_now.day_start().add_days(1))
                .len()
                .max(1),
        }
    }

    fn tail(mut values: Vec<f64>, length: usize) -> Vec<f64> {
        if values.len() > length {
            values.drain(..values.len() - length);
        }
        values
    }

    /// Moving average of the close.
    pub fn ma(
        &mut self,
        symbol: &str,
        span: Span,
        window: usize,
        ma_type: MaType,
    ) -> Result<Vec<f64>, SeriesError> {
        let length = self.span_to_len(span);
        let hist = self.history(
            symbol,
            Span::Count(length + window),
            DataField::Close,
            Interval::Day,
        )?;
        let out = match ma_type {
            MaType::Simple => indicator::sma(&hist, window),
            MaType::Exponential => indicator::ema(&hist, window),
        };
        Ok(Self::tail(out, length))
    }

    /// MACD histogram (fast EMA - slow EMA, less its signal line).
    pub fn macd(
        &mut self,
        symbol: &str,
        span: Span,
        fast: usize,
        slow: usize,
        signal: usize,
    ) -> Result<Vec<f64>, SeriesError> {
        let length = self.span_to_len(span);
        let hist = self.history(
            symbol,
            Span::Count(length + slow + signal),
            DataField::Close,
            Interval::Day,
        )?;
        Ok(Self::tail(indicator::macd_diff(&hist, fast, slow, signal), length))
    }

    /// Standard deviations from the moving average: 0 at the middle band,
    /// +/-1 at the outer bands.
    pub fn bollinger(
        &mut self,
        symbol: &str,
        span: Span,
        window: usize,
        ndev: f64,
    ) -> Result<Vec<f64>, SeriesError> {
        let length = self.span_to_len(span);
        let hist = self.history(
            symbol,
            Span::Count(length + window),
            DataField::Close,
            Interval::Day,
        )?;
        Ok(Self::tail(indicator::bollinger(&hist, window, ndev), length))
    }

    /// RSI transformed to [-1, 1]; above 0.2 reads overbought, below -0.2
    /// oversold.
    pub fn rsi(
        &mut self,
        symbol: &str,
        span: Span,
        window: usize,
    ) -> Result<Vec<f64>, SeriesError> {
        let length = self.span_to_len(span);
        let hist = self.history(
            symbol,
            Span::Count(length + window + 1),
            DataField::Close,
            Interval::Day,
        )?;
        Ok(Self::tail(indicator::rsi(&hist, window), length))
    }

    /// Stochastic %K transformed to [-1, 1].
    pub fn stoch(
        &mut self,
        symbol: &str,
        span: Span,
        window: usize,
    ) -> Result<Vec<f64>, SeriesError> {
        let length = self.span_to_len(span);
        let padded = Span::Count(length + window);
        let high = self.history(symbol, padded, DataField::High, Interval::Day)?;
        let low = self.history(symbol, padded, DataField::Low, Interval::Day)?;
        let close = self.history(symbol, padded, DataField::Close, Interval::Day)?;
        Ok(Self::tail(indicator::stoch(&high, &low, &close, window), length))
    }

    /// Day-over-day fractional change of the close.
    pub fn fraction_change(
        &mut self,
        symbol: &str,
        span: Span,
    ) -> Result<Vec<f64>, SeriesError> {
        let length = self.span_to_len(span);
        let hist = self.history(
            symbol,
            Span::Count(length + 1),
            DataField::Close,
            Interval::Day,
        )?;
        Ok(Self::tail(indicator::fraction_change(&hist), length))
    }

    /// Place an order: positive `amount` buys, negative sells. Market orders
    /// fill immediately at [Context::quote]; stop/limit orders become
    /// conditional records resolved by the driver's threshold pass.
    pub fn order(
        &mut self,
        symbol: &str,
        amount: i64,
        kind: OrderKind,
        stop: Option<f64>,
        limit: Option<f64>,
    ) -> Result<OrderEvent, SeriesError> {
        let cost = self.quote(symbol)?;
        Ok(self.portfolio.order(symbol, amount, kind, stop, limit, cost))
    }

    /// Buy or sell to bring the position to the target fraction of total
    /// portfolio value.
    pub fn order_fraction(&mut self, symbol: &str, fraction: f64) -> Result<OrderEvent, SeriesError> {
        let cost = self.quote(symbol)?;
        Ok(self.portfolio.order_fraction(symbol, fraction, cost))
    }

    /// Liquidate every held position.
    pub fn sell_all(&mut self) -> Result<(), SeriesError> {
        for symbol in self.held_symbols() {
            self.order_fraction(&symbol, 0.0)?;
        }
        Ok(())
    }

    /// Sell down to `fraction` of the portfolio once the price moves
    /// `change` away from here: positive `change` arms a stop-gain, negative
    /// a stop-loss.
    pub fn stop_sell(
        &mut self,
        symbol: &str,
        change: f64,
        fraction: f64,
    ) -> Result<(), SeriesError> {
        let cost = self.quote(symbol)?;
        self.portfolio.stop_sell(symbol, change, fraction, cost);
        Ok(())
    }

    /// Buy up to `fraction` of the portfolio once the price crosses `change`
    /// away from here. `None` allocates all currently free cash.
    pub fn limit_buy(
        &mut self,
        symbol: &str,
        change: f64,
        fraction: Option<f64>,
    ) -> Result<(), SeriesError> {
        let cost = self.quote(symbol)?;
        self.portfolio.limit_buy(symbol, change, fraction, cost);
        Ok(())
    }
}
