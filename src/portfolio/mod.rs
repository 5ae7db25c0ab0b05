//! Portfolio state and backtest order execution
//!
//! Market orders fill immediately at the caller-supplied cost; stop and limit
//! orders are not sent anywhere but converted into conditional records that
//! the driver's threshold pass resolves later. Cash and value are rounded to
//! two decimals after every mutation, and value is always recomputed from
//! scratch rather than incrementally drifted.
//!
//! Rejected orders are benign: strategies are expected to probe conditions
//! that sometimes fail (selling a position that is already flat), so a
//! rejection is logged and dropped, never fatal.

use std::collections::HashMap;

use itertools::Itertools;
use log::{info, warn};

use crate::types::round2;

/// A conditional-order record: trigger price and the portfolio fraction to
/// rebalance the position to once it fires.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Threshold {
    pub trigger: f64,
    pub fraction: f64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OrderKind {
    Market,
    Stop,
    Limit,
}

/// Outcome of an order attempt, reported to the caller so a backtest log can
/// be audited for trades that didn't happen.
#[derive(Clone, Debug, PartialEq)]
pub enum OrderEvent {
    Filled { symbol: String, shares: i64, cost: f64 },
    /// Stop/limit order converted into a conditional record.
    Deferred { symbol: String },
    InsufficientShares { symbol: String },
    InsufficientCash { symbol: String },
    Noop,
}

/// Price evidence available to a threshold check: a point sample at minute
/// granularity, or the session's low/high range at day granularity, where a
/// crossing could have happened at any unsampled minute.
#[derive(Clone, Copy, Debug)]
pub enum PriceView {
    Point(f64),
    Range { low: f64, high: f64 },
}

#[derive(Debug)]
pub struct Portfolio {
    cash: f64,
    value: f64,
    starting_capital: f64,
    stocks: HashMap<String, i64>,
    stop_losses: HashMap<String, Threshold>,
    stop_gains: HashMap<String, Threshold>,
    limit_low: HashMap<String, Threshold>,
    limit_high: HashMap<String, Threshold>,
}

impl Portfolio {
    pub fn new(capital: f64) -> Self {
        Self {
            cash: capital,
            value: capital,
            starting_capital: capital,
            stocks: HashMap::new(),
            stop_losses: HashMap::new(),
            stop_gains: HashMap::new(),
            limit_low: HashMap::new(),
            limit_high: HashMap::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn starting_capital(&self) -> f64 {
        self.starting_capital
    }

    pub fn position(&self, symbol: &str) -> i64 {
        self.stocks.get(symbol).copied().unwrap_or(0)
    }

    pub fn holdings(&self) -> &HashMap<String, i64> {
        &self.stocks
    }

    pub fn stop_loss(&self, symbol: &str) -> Option<Threshold> {
        self.stop_losses.get(symbol).copied()
    }

    pub fn stop_gain(&self, symbol: &str) -> Option<Threshold> {
        self.stop_gains.get(symbol).copied()
    }

    pub fn limit_low(&self, symbol: &str) -> Option<Threshold> {
        self.limit_low.get(symbol).copied()
    }

    pub fn limit_high(&self, symbol: &str) -> Option<Threshold> {
        self.limit_high.get(symbol).copied()
    }

    /// Recompute total value from cash plus per-position value at the given
    /// prices. Positions that have reached zero leave the map here.
    pub fn revalue(&mut self, prices: &HashMap<String, f64>) {
        self.stocks.retain(|_, qty| *qty != 0);
        let mut stock_value = 0.0;
        for (symbol, qty) in &self.stocks {
            if let Some(price) = prices.get(symbol) {
                stock_value += price * *qty as f64;
            } else {
                warn!("No valuation price for held position {symbol}");
            }
        }
        self.value = round2(self.cash + stock_value);
        self.cash = round2(self.cash);
    }

    /// Fill a market order at `cost` per share, positive `amount` buys,
    /// negative sells. Rejections leave all state untouched.
    pub fn market_order(&mut self, symbol: &str, amount: i64, cost: f64) -> OrderEvent {
        if amount < 0 && -amount > self.position(symbol) {
            warn!(
                "Attempting to sell more shares ({}) than are owned ({}) of {symbol}",
                -amount,
                self.position(symbol)
            );
            return OrderEvent::InsufficientShares {
                symbol: symbol.to_string(),
            };
        }
        if cost * amount as f64 > self.cash {
            warn!(
                "Not enough cash (${}) to buy {amount} shares of {symbol}",
                round2(self.cash)
            );
            return OrderEvent::InsufficientCash {
                symbol: symbol.to_string(),
            };
        }
        if amount == 0 {
            return OrderEvent::Noop;
        }
        *self.stocks.entry(symbol.to_string()).or_insert(0) += amount;
        self.cash = round2(self.cash - cost * amount as f64);
        if amount > 0 {
            info!("Buying {amount} shares of {symbol} at ${}", round2(cost));
        } else {
            info!("Selling {} shares of {symbol} at ${}", -amount, round2(cost));
        }
        OrderEvent::Filled {
            symbol: symbol.to_string(),
            shares: amount,
            cost,
        }
    }

    /// Order entry point matching the live contract: market orders fill
    /// immediately, stop/limit orders become conditional records keyed by the
    /// trigger price and the post-trigger allocation fraction.
    pub fn order(
        &mut self,
        symbol: &str,
        amount: i64,
        kind: OrderKind,
        stop: Option<f64>,
        limit: Option<f64>,
        cost: f64,
    ) -> OrderEvent {
        match kind {
            OrderKind::Market => self.market_order(symbol, amount, cost),
            OrderKind::Stop | OrderKind::Limit => {
                //Same guards as a market order, a deferred order that could
                //never fill should be rejected up front
                if amount < 0 && -amount > self.position(symbol) {
                    warn!(
                        "Attempting to sell more shares ({}) than are owned ({}) of {symbol}",
                        -amount,
                        self.position(symbol)
                    );
                    return OrderEvent::InsufficientShares {
                        symbol: symbol.to_string(),
                    };
                }
                if cost * amount as f64 > self.cash {
                    warn!(
                        "Not enough cash (${}) to buy {amount} shares of {symbol}",
                        round2(self.cash)
                    );
                    return OrderEvent::InsufficientCash {
                        symbol: symbol.to_string(),
                    };
                }
                if amount == 0 {
                    return OrderEvent::Noop;
                }
                //The record keys on the price matching the declared kind when
                //both are supplied
                let price = if kind == OrderKind::Stop {
                    stop.or(limit)
                } else {
                    limit.or(stop)
                };
                let Some(price) = price else {
                    warn!("Stop/limit order for {symbol} needs a stop or limit price");
                    return OrderEvent::Noop;
                };
                let change = (price - cost) / cost;
                let fraction = (self.position(symbol) + amount) as f64 * cost / self.value;
                if amount > 0 {
                    self.limit_buy(symbol, change, Some(fraction), cost);
                } else {
                    self.stop_sell(symbol, change, fraction, cost);
                }
                OrderEvent::Deferred {
                    symbol: symbol.to_string(),
                }
            }
        }
    }

    /// Buy or sell to move the position to the target fraction of total
    /// portfolio value. Sells are clamped to current holdings, buys to what
    /// available cash affords.
    pub fn order_fraction(&mut self, symbol: &str, fraction: f64, cost: f64) -> OrderEvent {
        let current_fraction = self.position(symbol) as f64 * cost / self.value;
        let fraction_diff = fraction - current_fraction;
        if fraction_diff < 0.0 {
            let amount = (((-fraction_diff * self.value / cost).round()) as i64)
                .min(self.position(symbol));
            self.market_order(symbol, -amount, cost)
        } else {
            let amount = ((fraction_diff * self.value / cost).floor() as i64)
                .min((self.cash / cost).floor() as i64);
            self.market_order(symbol, amount, cost)
        }
    }

    /// Register a stop order on a held position. A positive `change` sells
    /// once the price rises that far above `cost` (stop-gain), a negative
    /// `change` once it falls that far below (stop-loss). The record is
    /// consumed when it fires; re-add it after a sale.
    pub fn stop_sell(&mut self, symbol: &str, change: f64, fraction: f64, cost: f64) {
        let threshold = Threshold {
            trigger: (1.0 + change) * cost,
            fraction,
        };
        if change > 0.0 {
            self.stop_gains.insert(symbol.to_string(), threshold);
        } else if change < 0.0 {
            self.stop_losses.insert(symbol.to_string(), threshold);
        } else {
            warn!("Stop for {symbol} has zero change, no record armed");
        }
    }

    /// Register a limit order that buys once the price crosses `change` away
    /// from `cost`. A fraction of `None` allocates all currently free cash.
    pub fn limit_buy(&mut self, symbol: &str, change: f64, fraction: Option<f64>, cost: f64) {
        let fraction = fraction.unwrap_or(self.cash / self.value);
        let threshold = Threshold {
            trigger: (1.0 + change) * cost,
            fraction,
        };
        if change > 0.0 {
            self.limit_high.insert(symbol.to_string(), threshold);
        } else if change < 0.0 {
            self.limit_low.insert(symbol.to_string(), threshold);
        } else {
            warn!("Limit for {symbol} has zero change, no record armed");
        }
    }

    /// Symbols the threshold pass must look at: held positions plus every
    /// symbol with an outstanding conditional record.
    pub fn symbols_to_check(&self) -> Vec<String> {
        self.stocks
            .keys()
            .chain(self.stop_losses.keys())
            .chain(self.stop_gains.keys())
            .chain(self.limit_low.keys())
            .chain(self.limit_high.keys())
            .unique()
            .sorted()
            .cloned()
            .collect()
    }

    /// Evaluate one symbol's conditional records against the price evidence.
    /// The first satisfied record fires exactly once: it is removed before
    /// the rebalancing order executes. Stop records whose backing position
    /// has reached zero by other means are pruned.
    pub fn check_threshold(&mut self, symbol: &str, view: PriceView) -> Option<OrderEvent> {
        let (sell_price, buy_price) = match view {
            PriceView::Point(price) => (price, price),
            PriceView::Range { low, high } => (low, high),
        };
        let held = self.position(symbol) != 0;

        let fired = if held
            && self
                .stop_losses
                .get(symbol)
                .is_some_and(|t| sell_price <= t.trigger)
        {
            let t = self.stop_losses.remove(symbol).unwrap();
            info!("Stoploss for {symbol} kicking in at ${}", round2(t.trigger));
            Some(t)
        } else if held
            && self
                .stop_gains
                .get(symbol)
                .is_some_and(|t| buy_price >= t.trigger)
        {
            let t = self.stop_gains.remove(symbol).unwrap();
            info!("Stopgain for {symbol} kicking in at ${}", round2(t.trigger));
            Some(t)
        } else if self
            .limit_low
            .get(symbol)
            .is_some_and(|t| sell_price <= t.trigger)
        {
            let t = self.limit_low.remove(symbol).unwrap();
            info!("Limit order {symbol} activated at ${}", round2(t.trigger));
            Some(t)
        } else if self
            .limit_high
            .get(symbol)
            .is_some_and(|t| buy_price >= t.trigger)
        {
            let t = self.limit_high.remove(symbol).unwrap();
            info!("Limit order {symbol} activated at ${}", round2(t.trigger));
            Some(t)
        } else {
            None
        };

        if let Some(threshold) = fired {
            //Day-granularity evidence fills at the trigger itself, a point
            //sample fills at the observed price
            let cost = match view {
                PriceView::Point(price) => price,
                PriceView::Range { .. } => threshold.trigger,
            };
            return Some(self.order_fraction(symbol, threshold.fraction, cost));
        }

        if self.position(symbol) == 0 {
            self.stop_losses.remove(symbol);
            self.stop_gains.remove(symbol);
        }
        None
    }
}
