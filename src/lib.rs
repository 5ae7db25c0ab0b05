//! # How does Almanac work?
//!
//! The development goal is to provide a simple harness for running rule-based
//! trading strategies against historical data, with a simulation path faithful
//! enough that the same strategy code could be pointed at a live broker later.
//!
//! A backtest is composed of three components: a `Strategy`, a `SeriesCache`,
//! and the `Backtest` driver. The strategy declares when it wants to run and
//! what to do when it does; the cache serves every data query pinned to the
//! driver's virtual clock; the driver steps that clock through trading
//! sessions, fires the strategy on its schedule, marks the portfolio to
//! market, and resolves conditional orders. User strategies implement the
//! [strategy::Algorithm] trait and see the rest of the system only through
//! the [strategy::Context] handed to each invocation.
//!
//! ## Temporal correctness
//!
//! The problem with naive backtests is lookahead: a strategy that can see a
//! price even one sample past the simulated instant will backtest well and
//! trade poorly. Every history query here resolves to the latest sample
//! at-or-before virtual time, asking for more history than exists is an
//! error rather than a silently truncated answer, and the driver's clock can
//! only move forward. Day-granularity runs are cheap but approximate
//! intraday prices with bar fields; minute-granularity runs walk all 391
//! minute offsets of each session.
//!
//! ## Example
//!
//! A strategy that buys and holds one symbol:
//!
//! ```
//!     use almanac::backtest::BacktestBuilder;
//!     use almanac::input::FixedDataSource;
//!     use almanac::portfolio::OrderKind;
//!     use almanac::strategy::{Algorithm, Context};
//!     use almanac::types::DateTime;
//!
//!     struct BuyAndHold;
//!
//!     impl Algorithm for BuyAndHold {
//!         fn run(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
//!             if ctx.position("ABC") == 0 {
//!                 ctx.order_fraction("ABC", 1.0)?;
//!             }
//!             Ok(())
//!         }
//!
//!         fn benchmark(&self) -> String {
//!             "ABC".to_string()
//!         }
//!     }
//!
//!     let start = DateTime::from_ymd(2021, 10, 4);
//!     let mut source = FixedDataSource::new();
//!     for (i, price) in [100.0, 101.0, 99.0, 102.0, 103.0].iter().enumerate() {
//!         source.add_price("ABC", start.add_days(i as i64), *price);
//!     }
//!
//!     let mut backtest = BacktestBuilder::new(BuyAndHold)
//!         .with_source(Box::new(source))
//!         .with_capital(10_000.0)
//!         .with_range(start, start.add_days(4))
//!         .build();
//!     let summary = backtest.run();
//!     assert_eq!(summary.chart_day.len(), 5);
//! ```

pub mod backtest;
pub mod calendar;
pub mod indicator;
pub mod input;
pub mod perf;
pub mod portfolio;
pub mod schedule;
pub mod series;
pub mod source;
pub mod strategy;
pub mod types;
