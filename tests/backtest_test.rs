use almanac::backtest::BacktestBuilder;
use almanac::input::{Bar, FixedDataSource};
use almanac::portfolio::OrderKind;
use almanac::series::Span;
use almanac::strategy::{Algorithm, Context, MaType};
use almanac::types::{DateTime, Interval};

//Mon 2021-10-04 onward, day bars stamped at session start
fn day_bars(specs: &[(f64, f64, f64, f64)]) -> (FixedDataSource, DateTime, DateTime) {
    let start = DateTime::from_ymd(2021, 10, 4);
    let mut source = FixedDataSource::new();
    for (i, (open, high, low, close)) in specs.iter().enumerate() {
        source.add_bar(
            "ABC",
            Interval::Day,
            Bar {
                date: *start.add_days(i as i64),
                open: *open,
                high: *high,
                low: *low,
                close: *close,
                volume: 1_000.0,
            },
        );
    }
    (source, start, start.add_days(specs.len() as i64 - 1))
}

struct BuyOneShareDaily;

impl Algorithm for BuyOneShareDaily {
    fn run(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
        ctx.order("ABC", 1, OrderKind::Market, None, None)?;
        Ok(())
    }

    fn benchmark(&self) -> String {
        "ABC".to_string()
    }
}

#[test]
fn test_that_full_run_produces_hand_computed_equity_curve() {
    let (source, start, end) = day_bars(&[
        (100.0, 100.0, 100.0, 100.0),
        (101.0, 101.0, 101.0, 101.0),
        (99.0, 99.0, 99.0, 99.0),
        (102.0, 102.0, 102.0, 102.0),
        (103.0, 103.0, 103.0, 103.0),
    ]);
    let mut backtest = BacktestBuilder::new(BuyOneShareDaily)
        .with_source(Box::new(source))
        .with_capital(1_000.0)
        .with_range(start, end)
        .build();

    let summary = backtest.run();

    //One share bought at each open, portfolio marked at each close
    let values: Vec<f64> = summary.chart_day.iter().map(|p| p.value).collect();
    assert_eq!(values, vec![1_000.0, 1_001.0, 997.0, 1_006.0, 1_010.0]);
    assert_eq!(summary.final_value, 1_010.0);
    assert_eq!(summary.cash, 495.0);

    let metrics = summary.metrics.expect("five day samples give metrics");
    //Worst decline of the curve is 1001 -> 997
    assert_eq!(metrics.max_drawdown, ((997.0 / 1_001.0 - 1.0) * 1_000.0_f64).round() / 1_000.0);
    //Strategy is long-only in the benchmark itself, so returns co-move
    assert!(metrics.beta > 0.0);
}

struct BuyThenStopLoss {
    armed: bool,
}

impl Algorithm for BuyThenStopLoss {
    fn run(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
        if !self.armed {
            ctx.order("ABC", 50, OrderKind::Market, None, None)?;
            //Liquidate if the price falls 10% from here
            ctx.stop_sell("ABC", -0.1, 0.0)?;
            self.armed = true;
        }
        Ok(())
    }

    fn benchmark(&self) -> String {
        "ABC".to_string()
    }
}

#[test]
fn test_that_day_mode_stop_loss_fills_at_trigger_when_session_low_crosses() {
    let (source, start, end) = day_bars(&[
        (100.0, 105.0, 95.0, 100.0),
        (101.0, 103.0, 92.0, 101.0),
        //Session low pierces the 90.0 trigger, the close never does
        (99.0, 100.0, 85.0, 88.0),
        (90.0, 95.0, 88.0, 92.0),
        (93.0, 96.0, 91.0, 95.0),
    ]);
    let mut backtest = BacktestBuilder::new(BuyThenStopLoss { armed: false })
        .with_source(Box::new(source))
        .with_capital(10_000.0)
        .with_range(start, end)
        .build();

    let summary = backtest.run();

    //50 shares bought at 100, sold at the 90.0 trigger on day three
    assert_eq!(backtest.portfolio().position("ABC"), 0);
    assert_eq!(summary.cash, 9_500.0);
    assert_eq!(summary.final_value, 9_500.0);
    //Flat after the stop, the curve holds at the post-sale value
    let values: Vec<f64> = summary.chart_day.iter().map(|p| p.value).collect();
    assert_eq!(values, vec![10_000.0, 10_050.0, 9_500.0, 9_500.0, 9_500.0]);
}

struct BuyMidMorning;

impl Algorithm for BuyMidMorning {
    fn run(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
        ctx.order("ABC", 10, OrderKind::Market, None, None)?;
        Ok(())
    }

    fn schedule(&self) -> almanac::schedule::RunSchedule {
        almanac::schedule::RunSchedule::from_times(&[(10, 0)])
    }

    fn benchmark(&self) -> String {
        "ABC".to_string()
    }
}

#[test]
fn test_that_minute_mode_quotes_from_minute_closes() {
    let day = DateTime::from_ymd(2021, 10, 4);
    let mut source = FixedDataSource::new();
    //Flat minute tape at 100 plus a day bar closing at 102
    for offset in 0..391 {
        source.add_bar(
            "ABC",
            Interval::Minute,
            Bar {
                date: *day.with_hm(9, 30).add_minutes(offset),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 10.0,
            },
        );
    }
    source.add_bar(
        "ABC",
        Interval::Day,
        Bar {
            date: *day,
            open: 100.0,
            high: 102.0,
            low: 99.0,
            close: 102.0,
            volume: 1_000.0,
        },
    );

    let mut backtest = BacktestBuilder::new(BuyMidMorning)
        .with_source(Box::new(source))
        .with_capital(10_000.0)
        .with_granularity(Interval::Minute)
        .with_range(day, day)
        .build();

    let summary = backtest.run();

    //Bought at the 10:00 minute close, day snapshot marks at the day close
    assert_eq!(backtest.portfolio().position("ABC"), 10);
    assert_eq!(summary.cash, 9_000.0);
    assert_eq!(summary.final_value, 10_020.0);
    assert_eq!(summary.chart_day.len(), 1);
}

struct SmaCrossover {
    window: usize,
}

impl Algorithm for SmaCrossover {
    fn run(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
        let close = ctx.history(
            "ABC",
            Span::Count(1),
            almanac::input::DataField::Close,
            Interval::Day,
        )?[0];
        let sma = ctx.ma("ABC", Span::Count(1), self.window, MaType::Simple)?[0];
        if close > sma && ctx.position("ABC") == 0 {
            ctx.order_fraction("ABC", 1.0)?;
        }
        if close < sma && ctx.position("ABC") > 0 {
            ctx.order_fraction("ABC", 0.0)?;
        }
        Ok(())
    }

    fn benchmark(&self) -> String {
        "ABC".to_string()
    }
}

#[test]
fn test_that_indicator_warmup_reaches_back_before_the_simulated_range() {
    let history_start = DateTime::from_ymd(2021, 8, 2);
    let mut source = FixedDataSource::new();
    //30 weekdays of history before the simulated week, then a rising tape
    let mut date = history_start;
    let mut price = 100.0;
    let mut sessions = Vec::new();
    while sessions.len() < 35 {
        if !matches!(date.weekday(), time::Weekday::Saturday | time::Weekday::Sunday) {
            source.add_price("ABC", date, price);
            sessions.push(date);
            price += 1.0;
        }
        date = date.add_days(1);
    }
    let start = sessions[30];
    let end = sessions[34];

    let mut backtest = BacktestBuilder::new(SmaCrossover { window: 5 })
        .with_source(Box::new(source))
        .with_capital(10_000.0)
        .with_range(start, end)
        .build();

    let summary = backtest.run();

    //Rising tape stays above its moving average, the strategy is long
    //throughout and the indicator warm-up never truncated
    assert!(backtest.portfolio().position("ABC") > 0);
    assert!(summary.final_value > 10_000.0);
}
