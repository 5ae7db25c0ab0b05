//! Backtest driver
//!
//! Replays a strategy against historical data by stepping a virtual clock
//! through trading sessions at either day or minute resolution. Every data
//! access the strategy makes is pinned to the virtual instant, so the run is
//! deterministic given the same source.
//!
//! The two granularities trade cost for fidelity. A minute loop walks all 391
//! minute offsets of each session, firing the schedule, snapshotting value,
//! and checking conditional orders against the minute close. A day loop jumps
//! straight between scheduled run instants and checks conditional orders
//! against the session's low/high range, where a crossing could have happened
//! at any unsampled minute.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use log::{error, info};
use serde::Serialize;

use crate::calendar::{TradingCalendar, WeekdayCalendar};
use crate::input::{DataField, MarketDataSource, RetryPolicy};
use crate::perf::RiskMetrics;
use crate::portfolio::{Portfolio, PriceView};
use crate::schedule::RunSchedule;
use crate::series::{SeriesCache, SeriesError, Span};
use crate::strategy::{Algorithm, Context};
use crate::types::{DateTime, Interval, MINUTES_IN_SESSION, SESSION_CUTOFF_MINUTE, SESSION_OPEN_MINUTE};

/// Virtual clock owned by the driver. Can only move forward: the cache's
/// hint-accelerated index search assumes monotonic time, so a backward move
/// is a driver bug, not a recoverable condition.
#[derive(Clone, Copy, Debug)]
pub struct SimClock {
    now: DateTime,
}

impl SimClock {
    pub fn new(start: DateTime) -> Self {
        Self { now: start }
    }

    pub fn now(&self) -> DateTime {
        self.now
    }

    pub fn advance(&mut self, to: DateTime) {
        if to < self.now {
            panic!(
                "Virtual clock moved backwards: {} -> {}",
                i64::from(self.now),
                i64::from(to)
            );
        }
        self.now = to;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    NotStarted,
    Running,
    Finished,
}

/// One portfolio valuation sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ChartPoint {
    pub date: DateTime,
    pub value: f64,
}

/// Final report of a completed run.
#[derive(Clone, Debug, Serialize)]
pub struct BacktestSummary {
    pub starting_capital: f64,
    pub final_value: f64,
    pub cash: f64,
    pub chart_day: Vec<ChartPoint>,
    pub metrics: Option<RiskMetrics>,
}

pub struct BacktestBuilder<A: Algorithm> {
    algo: A,
    source: Option<Box<dyn MarketDataSource>>,
    calendar: Arc<dyn TradingCalendar + Send + Sync>,
    capital: f64,
    granularity: Interval,
    start: Option<DateTime>,
    end: Option<DateTime>,
    retry: RetryPolicy,
    schedule: Option<RunSchedule>,
    benchmark: Option<String>,
}

impl<A: Algorithm> BacktestBuilder<A> {
    pub fn new(algo: A) -> Self {
        Self {
            algo,
            source: None,
            calendar: Arc::new(WeekdayCalendar),
            capital: 10_000.0,
            granularity: Interval::Day,
            start: None,
            end: None,
            retry: RetryPolicy::default(),
            schedule: None,
            benchmark: None,
        }
    }

    pub fn with_source(mut self, source: Box<dyn MarketDataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn TradingCalendar + Send + Sync>) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_capital(mut self, capital: f64) -> Self {
        self.capital = capital;
        self
    }

    pub fn with_granularity(mut self, granularity: Interval) -> Self {
        self.granularity = granularity;
        self
    }

    /// Simulated period, inclusive of both dates.
    pub fn with_range(mut self, start: DateTime, end: DateTime) -> Self {
        self.start = Some(start.day_start());
        self.end = Some(end.day_start());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the schedule the strategy declares.
    pub fn with_schedule(mut self, schedule: RunSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Override the benchmark the strategy declares.
    pub fn with_benchmark(mut self, benchmark: impl Into<String>) -> Self {
        self.benchmark = Some(benchmark.into());
        self
    }

    pub fn build(self) -> Backtest<A> {
        let Some(source) = self.source else {
            panic!("Can't build backtest without data source");
        };
        let (Some(start), Some(end)) = (self.start, self.end) else {
            panic!("Can't build backtest without date range");
        };
        let schedule = self.schedule.unwrap_or_else(|| self.algo.schedule());
        let benchmark = self.benchmark.unwrap_or_else(|| self.algo.benchmark());
        let cache = SeriesCache::new(source, Arc::clone(&self.calendar)).with_retry(self.retry);
        Backtest {
            algo: self.algo,
            granularity: self.granularity,
            start,
            end,
            calendar: self.calendar,
            schedule,
            benchmark,
            cache,
            portfolio: Portfolio::new(self.capital),
            clock: SimClock::new(start),
            state: RunState::NotStarted,
            chart_minute: Vec::new(),
            chart_day: Vec::new(),
            metrics: None,
        }
    }
}

pub struct Backtest<A: Algorithm> {
    algo: A,
    granularity: Interval,
    start: DateTime,
    end: DateTime,
    calendar: Arc<dyn TradingCalendar + Send + Sync>,
    schedule: RunSchedule,
    benchmark: String,
    cache: SeriesCache,
    portfolio: Portfolio,
    clock: SimClock,
    state: RunState,
    chart_minute: Vec<ChartPoint>,
    chart_day: Vec<ChartPoint>,
    metrics: Option<RiskMetrics>,
}

impl<A: Algorithm> Backtest<A> {
    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn chart_day(&self) -> &[ChartPoint] {
        &self.chart_day
    }

    pub fn chart_minute(&self) -> &[ChartPoint] {
        &self.chart_minute
    }

    pub fn metrics(&self) -> Option<RiskMetrics> {
        self.metrics
    }

    /// Run to completion on the current thread.
    pub fn run(&mut self) -> BacktestSummary {
        self.state = RunState::Running;
        info!(
            "Starting backtest from {} to {} at {:?} granularity",
            i64::from(self.start),
            i64::from(self.end),
            self.granularity
        );

        let sessions = self.calendar.sessions(self.start, self.end.add_days(1));
        self.revalue_positions();
        self.initialize_algorithm();

        'days: for session in sessions {
            match self.granularity {
                Interval::Minute => {
                    for offset in 0..MINUTES_IN_SESSION {
                        let vt = session
                            .with_hm(SESSION_OPEN_MINUTE / 60, SESSION_OPEN_MINUTE % 60)
                            .add_minutes(offset);
                        //Caught up with the wall clock, the rest of the
                        //period has no data yet
                        if vt >= DateTime::now() {
                            break 'days;
                        }
                        self.clock.advance(vt);
                        if self.schedule.fires_at(vt) {
                            self.revalue_positions();
                            self.run_algorithm();
                        }
                        self.snapshot_minute();
                        self.check_thresholds();
                    }
                    self.clock.advance(session.with_hm(16, 0));
                    self.snapshot_day();
                }
                Interval::Day => {
                    let mut checked = false;
                    let mut cursor = session;
                    //An empty schedule means no runs, the session still gets
                    //its threshold pass and snapshot
                    while let Some(fire) = self.schedule.next_fire(cursor) {
                        if !fire.same_day(&session) {
                            break;
                        }
                        if fire >= DateTime::now() {
                            break 'days;
                        }
                        self.clock.advance(fire);
                        //A run at-or-past the session cutoff sees the whole
                        //day's range, so resolve conditional orders first
                        if !checked && fire.minute_of_day() >= SESSION_CUTOFF_MINUTE {
                            self.check_thresholds();
                            checked = true;
                        }
                        self.revalue_positions();
                        self.run_algorithm();
                        cursor = fire.add_minutes(1);
                    }
                    if !checked {
                        self.check_thresholds();
                    }
                    //An after-hours trigger may have moved the clock past the
                    //nominal close already
                    self.clock
                        .advance(session.with_hm(16, 0).max(self.clock.now()));
                    self.snapshot_day();
                }
            }
        }

        self.state = RunState::Finished;
        info!(
            "Backtest complete, final value ${}",
            self.portfolio.value()
        );
        BacktestSummary {
            starting_capital: self.portfolio.starting_capital(),
            final_value: self.portfolio.value(),
            cash: self.portfolio.cash(),
            chart_day: self.chart_day.clone(),
            metrics: self.metrics,
        }
    }

    /// Run on a worker thread, returning a handle to the summary. Backtests
    /// over disjoint caches are independent, so a portfolio of strategies can
    /// be evaluated in parallel.
    pub fn spawn(mut self) -> thread::JoinHandle<BacktestSummary>
    where
        A: 'static,
    {
        thread::spawn(move || self.run())
    }

    fn context(&mut self, wall: DateTime) -> Context<'_> {
        Context::new(
            self.clock.now(),
            wall,
            self.granularity,
            &mut self.cache,
            &mut self.portfolio,
            &*self.calendar,
        )
    }

    fn initialize_algorithm(&mut self) {
        let wall = DateTime::now();
        let mut ctx = Context::new(
            self.clock.now(),
            wall,
            self.granularity,
            &mut self.cache,
            &mut self.portfolio,
            &*self.calendar,
        );
        self.algo.initialize(&mut ctx);
    }

    //A strategy error aborts one run invocation, never the whole simulation
    fn run_algorithm(&mut self) {
        let wall = DateTime::now();
        let mut ctx = Context::new(
            self.clock.now(),
            wall,
            self.granularity,
            &mut self.cache,
            &mut self.portfolio,
            &*self.calendar,
        );
        if let Err(err) = self.algo.run(&mut ctx) {
            error!("Error running algorithm: {err:?}");
        }
    }

    fn quote(&mut self, symbol: &str, wall: DateTime) -> Result<f64, SeriesError> {
        self.context(wall).quote(symbol)
    }

    /// Reprice every held position at the virtual instant. A symbol that
    /// cannot be priced is skipped with an error, its previous contribution
    /// drops out of the valuation.
    fn revalue_positions(&mut self) {
        let wall = DateTime::now();
        let symbols: Vec<String> = self.portfolio.holdings().keys().cloned().collect();
        let mut prices = HashMap::new();
        for symbol in symbols {
            match self.quote(&symbol, wall) {
                Ok(price) => {
                    prices.insert(symbol, price);
                }
                Err(err) => error!("Could not price {symbol}: {err}"),
            }
        }
        self.portfolio.revalue(&prices);
    }

    fn day_sample(&mut self, symbol: &str, field: DataField, wall: DateTime) -> Result<f64, SeriesError> {
        let now = self.clock.now();
        self.cache
            .history(symbol, Span::Count(1), field, Interval::Day, now, wall)
            .map(|values| values[0])
    }

    /// Resolve outstanding conditional orders against the price evidence the
    /// current granularity provides.
    fn check_thresholds(&mut self) {
        let wall = DateTime::now();
        for symbol in self.portfolio.symbols_to_check() {
            let view = match self.granularity {
                Interval::Minute => match self.quote(&symbol, wall) {
                    Ok(price) => PriceView::Point(price),
                    Err(err) => {
                        error!("Could not check thresholds for {symbol}: {err}");
                        continue;
                    }
                },
                Interval::Day => {
                    let low = self.day_sample(&symbol, DataField::Low, wall);
                    let high = self.day_sample(&symbol, DataField::High, wall);
                    match (low, high) {
                        (Ok(low), Ok(high)) => PriceView::Range { low, high },
                        (Err(err), _) | (_, Err(err)) => {
                            error!("Could not check thresholds for {symbol}: {err}");
                            continue;
                        }
                    }
                }
            };
            self.portfolio.check_threshold(&symbol, view);
        }
    }

    fn snapshot_minute(&mut self) {
        self.revalue_positions();
        self.chart_minute.push(ChartPoint {
            date: self.clock.now(),
            value: self.portfolio.value(),
        });
    }

    fn snapshot_day(&mut self) {
        self.revalue_positions();
        self.chart_day.push(ChartPoint {
            date: self.clock.now(),
            value: self.portfolio.value(),
        });
        self.chart_minute.clear();
        self.refresh_metrics();
    }

    //Recomputed from the full day history so a bad intermediate cannot
    //persist into later snapshots
    fn refresh_metrics(&mut self) {
        if self.chart_day.len() < 2 {
            return;
        }
        let values: Vec<f64> = self.chart_day.iter().map(|p| p.value).collect();
        let wall = DateTime::now();
        let now = self.clock.now();
        match self.cache.history(
            &self.benchmark,
            Span::Count(values.len()),
            DataField::Close,
            Interval::Day,
            now,
            wall,
        ) {
            Ok(closes) => {
                if let Some(metrics) = RiskMetrics::from_day_values(&values, &closes) {
                    self.metrics = Some(metrics);
                }
            }
            Err(err) => error!(
                "Could not compute risk metrics against {}: {err}",
                self.benchmark
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BacktestBuilder, RunState, SimClock};
    use crate::input::FixedDataSource;
    use crate::schedule::RunSchedule;
    use crate::strategy::{Algorithm, Context};
    use crate::types::{DateTime, Interval};

    #[test]
    #[should_panic]
    fn test_that_clock_rejects_backward_advance() {
        let mut clock = SimClock::new(DateTime::from(1_000));
        clock.advance(DateTime::from(500));
    }

    struct DoNothing;

    impl Algorithm for DoNothing {
        fn run(&mut self, _ctx: &mut Context) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct BuyDaily {
        symbol: String,
    }

    impl Algorithm for BuyDaily {
        fn run(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
            let symbol = self.symbol.clone();
            ctx.order(
                &symbol,
                1,
                crate::portfolio::OrderKind::Market,
                None,
                None,
            )?;
            Ok(())
        }

        fn benchmark(&self) -> String {
            self.symbol.clone()
        }
    }

    //Mon 2021-10-04 through Fri 2021-10-08, day bars at session start
    fn week_source(prices: &[f64]) -> (FixedDataSource, DateTime, DateTime) {
        let start = DateTime::from_ymd(2021, 10, 4);
        let mut source = FixedDataSource::new();
        for (i, price) in prices.iter().enumerate() {
            source.add_price("ABC", start.add_days(i as i64), *price);
        }
        (source, start, start.add_days(prices.len() as i64 - 1))
    }

    #[test]
    fn test_that_empty_strategy_produces_one_day_point_per_session() {
        let (source, start, end) = week_source(&[100.0, 101.0, 99.0, 102.0, 103.0]);
        let mut backtest = BacktestBuilder::new(DoNothing)
            .with_source(Box::new(source))
            .with_capital(1_000.0)
            .with_range(start, end)
            .build();
        assert_eq!(backtest.state(), RunState::NotStarted);

        let summary = backtest.run();
        assert_eq!(backtest.state(), RunState::Finished);
        assert_eq!(summary.chart_day.len(), 5);
        assert!(summary.chart_day.iter().all(|p| p.value == 1_000.0));
        assert_eq!(summary.final_value, 1_000.0);
    }

    #[test]
    fn test_that_daily_buys_accumulate_and_revalue_at_close() {
        let (source, start, end) = week_source(&[100.0, 101.0, 99.0, 102.0, 103.0]);
        let mut backtest = BacktestBuilder::new(BuyDaily {
            symbol: "ABC".to_string(),
        })
        .with_source(Box::new(source))
        .with_capital(1_000.0)
        .with_range(start, end)
        .build();

        let summary = backtest.run();
        assert_eq!(backtest.portfolio().position("ABC"), 5);
        //One share bought at each open, repriced at each close
        let values: Vec<f64> = summary.chart_day.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1_000.0, 1_001.0, 997.0, 1_006.0, 1_010.0]);
        assert!(summary.metrics.is_some());
    }

    #[test]
    fn test_that_minute_loop_resets_minute_chart_at_day_end() {
        let (source, start, _) = week_source(&[100.0, 101.0]);
        let mut backtest = BacktestBuilder::new(DoNothing)
            .with_source(Box::new(source))
            .with_granularity(Interval::Minute)
            .with_range(start, start)
            .build();

        let summary = backtest.run();
        assert_eq!(summary.chart_day.len(), 1);
        assert!(backtest.chart_minute().is_empty());
    }

    #[test]
    fn test_that_builder_schedule_overrides_the_strategy() {
        let (source, start, end) = week_source(&[100.0, 101.0, 99.0, 102.0, 103.0]);
        let mut backtest = BacktestBuilder::new(BuyDaily {
            symbol: "ABC".to_string(),
        })
        .with_source(Box::new(source))
        .with_capital(2_000.0)
        .with_range(start, end)
        .with_schedule(RunSchedule::from_times(&[(9, 30), (12, 0)]))
        .build();

        backtest.run();
        //Two fires per session instead of one
        assert_eq!(backtest.portfolio().position("ABC"), 10);
    }

    #[test]
    fn test_that_empty_schedule_still_snapshots_every_session() {
        let (source, start, end) = week_source(&[100.0, 101.0, 99.0, 102.0, 103.0]);
        let mut backtest = BacktestBuilder::new(BuyDaily {
            symbol: "ABC".to_string(),
        })
        .with_source(Box::new(source))
        .with_capital(1_000.0)
        .with_range(start, end)
        .with_schedule(RunSchedule::from_times(&[]))
        .build();

        let summary = backtest.run();
        //The strategy never fires but the equity curve is still recorded
        assert_eq!(backtest.portfolio().position("ABC"), 0);
        assert_eq!(summary.chart_day.len(), 5);
        assert!(summary.chart_day.iter().all(|p| p.value == 1_000.0));
    }

    #[test]
    fn test_that_after_hours_trigger_does_not_break_the_clock() {
        let (source, start, end) = week_source(&[100.0, 101.0, 99.0, 102.0, 103.0]);
        let mut backtest = BacktestBuilder::new(BuyDaily {
            symbol: "ABC".to_string(),
        })
        .with_source(Box::new(source))
        .with_capital(2_000.0)
        .with_range(start, end)
        .with_schedule(RunSchedule::from_times(&[(16, 30)]))
        .build();

        let summary = backtest.run();
        //One fill per session at the day close, snapshots stay monotonic
        assert_eq!(backtest.portfolio().position("ABC"), 5);
        assert_eq!(summary.chart_day.len(), 5);
        assert!(summary
            .chart_day
            .windows(2)
            .all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_that_spawned_backtest_returns_summary() {
        let (source, start, end) = week_source(&[100.0, 101.0, 99.0, 102.0, 103.0]);
        let backtest = BacktestBuilder::new(DoNothing)
            .with_source(Box::new(source))
            .with_capital(1_000.0)
            .with_range(start, end)
            .build();

        let summary = backtest.spawn().join().unwrap();
        assert_eq!(summary.chart_day.len(), 5);
    }
}
