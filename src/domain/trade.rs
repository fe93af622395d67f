//! Closed-trade records emitted by the replay engine.

use std::fmt;

use chrono::NaiveDateTime;

/// Identity of one variant inside a sweep: which strategy group it belongs to
/// and its index within the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    pub group: usize,
    pub key: usize,
}

impl VariantKey {
    pub fn new(group: usize, key: usize) -> Self {
        Self { group, key }
    }

    /// Aggregator shard that owns this variant.
    pub fn shard(&self, shards: usize) -> usize {
        if shards == 0 { 0 } else { self.key % shards }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SellReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    SplitSell,
    ExitSignal,
    /// Forced liquidation at day boundary, day-end time or end of replay.
    LastSell,
}

impl SellReason {
    pub fn code(self) -> u8 {
        match self {
            SellReason::TakeProfit => 1,
            SellReason::StopLoss => 2,
            SellReason::TrailingStop => 3,
            SellReason::SplitSell => 4,
            SellReason::ExitSignal => 5,
            SellReason::LastSell => 9,
        }
    }
}

impl fmt::Display for SellReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SellReason::TakeProfit => "take_profit",
            SellReason::StopLoss => "stop_loss",
            SellReason::TrailingStop => "trailing_stop",
            SellReason::SplitSell => "split_sell",
            SellReason::ExitSignal => "exit_signal",
            SellReason::LastSell => "last_sell",
        };
        write!(f, "{}", s)
    }
}

/// One buy fill in a position's incremental-buy log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuyFill {
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeResult {
    pub instrument: String,
    pub variant: VariantKey,
    pub buy_time: NaiveDateTime,
    pub sell_time: NaiveDateTime,
    pub hold_secs: i64,
    /// Average entry price at the time of this exit.
    pub buy_price: f64,
    pub sell_price: f64,
    pub quantity: f64,
    pub buy_amount: f64,
    pub sell_amount: f64,
    /// Percent return of this exit against the average entry.
    pub profit_ratio: f64,
    pub profit_amount: f64,
    pub reason: SellReason,
    pub buy_log: Vec<BuyFill>,
    pub fully_closed: bool,
}

impl TradeResult {
    pub fn buy_epoch_secs(&self) -> i64 {
        self.buy_time.and_utc().timestamp()
    }

    pub fn is_win(&self) -> bool {
        self.profit_amount > 0.0
    }
}
