//! Runs a moving-average momentum strategy over a random-walk tape and
//! prints the summary as JSON. Set RUST_LOG=info to watch the fills.

use almanac::backtest::BacktestBuilder;
use almanac::calendar::{TradingCalendar, WeekdayCalendar};
use almanac::input::{random_source_generator, DataField};
use almanac::series::Span;
use almanac::strategy::{Algorithm, Context, MaType};
use almanac::types::{DateTime, Interval};

struct Momentum {
    window: usize,
}

impl Algorithm for Momentum {
    fn run(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
        let close = ctx.history("ABC", Span::Count(1), DataField::Close, Interval::Day)?[0];
        let sma = ctx.ma("ABC", Span::Count(1), self.window, MaType::Simple)?[0];
        if close > sma && ctx.position("ABC") == 0 {
            ctx.order_fraction("ABC", 0.9)?;
        }
        if close < sma && ctx.position("ABC") > 0 {
            ctx.order_fraction("ABC", 0.0)?;
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let start = DateTime::from_ymd(2021, 1, 4);
    let end = DateTime::from_ymd(2021, 6, 30);
    //Tape starts well before the simulated range so the indicator warm-up
    //has history to reach into
    let sessions = WeekdayCalendar.sessions(start.add_days(-200), end.add_days(1));
    let source = random_source_generator(&["ABC", "SPY"], &sessions);

    let mut backtest = BacktestBuilder::new(Momentum { window: 10 })
        .with_source(Box::new(source))
        .with_capital(100_000.0)
        .with_range(start, end)
        .build();
    let summary = backtest.run();

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
