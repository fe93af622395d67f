//! Per-variant trade ledger and concurrent-position series.
//!
//! Trades are keyed by buy timestamp in whole seconds. Two trades that share
//! a key are not an error: the later insert moves forward one second at a
//! time until it finds a free key. Inserting a batch sorted by
//! [`ledger_order`] makes the final key assignment independent of the order
//! in which workers delivered the trades.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use super::trade::TradeResult;

#[derive(Debug, Clone, Default)]
pub struct ResultLedger {
    entries: BTreeMap<i64, TradeResult>,
}

impl ResultLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under the first free key at or after the buy second. Returns the key used.
    pub fn insert(&mut self, trade: TradeResult) -> i64 {
        let mut key = trade.buy_epoch_secs();
        while self.entries.contains_key(&key) {
            key += 1;
        }
        self.entries.insert(key, trade);
        key
    }

    /// Sort `trades` by [`ledger_order`] and insert them all.
    pub fn insert_batch(&mut self, mut trades: Vec<TradeResult>) {
        trades.sort_by(ledger_order);
        for trade in trades {
            self.insert(trade);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &TradeResult)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Trades in key order.
    pub fn trades(&self) -> impl Iterator<Item = &TradeResult> {
        self.entries.values()
    }

    pub fn into_trades(self) -> Vec<TradeResult> {
        self.entries.into_values().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of positions open over time, with the capital they tie up.
    ///
    /// Built from fully-closed trades only, so a position exited in several
    /// tranches counts once, from first buy to final sell.
    pub fn position_series(&self) -> Vec<PositionPoint> {
        let mut events: Vec<(NaiveDateTime, i64, f64)> = Vec::new();
        for trade in self.trades().filter(|t| t.fully_closed) {
            let capital: f64 = trade.buy_log.iter().map(|f| f.price * f.quantity).sum();
            events.push((trade.buy_time, 1, capital));
            events.push((trade.sell_time, -1, -capital));
        }
        // closes before opens at the same instant
        events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut open = 0i64;
        let mut capital = 0.0f64;
        events
            .into_iter()
            .map(|(time, delta, amount)| {
                open += delta;
                capital += amount;
                PositionPoint {
                    time,
                    open_positions: open,
                    capital: capital.max(0.0),
                }
            })
            .collect()
    }
}

/// Canonical ordering used before ledger insertion.
pub fn ledger_order(a: &TradeResult, b: &TradeResult) -> Ordering {
    a.buy_time
        .cmp(&b.buy_time)
        .then_with(|| a.instrument.cmp(&b.instrument))
        .then_with(|| a.sell_time.cmp(&b.sell_time))
        .then_with(|| a.quantity.total_cmp(&b.quantity))
        .then_with(|| a.sell_price.total_cmp(&b.sell_price))
        .then_with(|| a.buy_price.total_cmp(&b.buy_price))
        .then_with(|| a.reason.code().cmp(&b.reason.code()))
        .then_with(|| a.variant.cmp(&b.variant))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionPoint {
    pub time: NaiveDateTime,
    pub open_positions: i64,
    pub capital: f64,
}

/// Peak concurrent positions and peak capital over a series.
pub fn position_peaks(series: &[PositionPoint]) -> (i64, f64) {
    series.iter().fold((0, 0.0), |(n, c), p| {
        (n.max(p.open_positions), c.max(p.capital))
    })
}
