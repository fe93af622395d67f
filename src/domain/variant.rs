//! Per-variant position state machine data.
//!
//! Each variant of a batch owns one `VariantState` and one `DayState`. Both
//! live in a flat `Vec` arena inside the engine, indexed by position in the
//! batch, and are only ever touched by the worker running that batch.

use chrono::NaiveDateTime;

use super::trade::{BuyFill, SellReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Flat,
    /// Entry order parked, nothing held yet.
    PendingBuy,
    Holding,
    /// Holding, with an exit order parked.
    PendingSell,
}

#[derive(Debug, Clone, Default)]
pub struct VariantState {
    pub phase: Phase,
    /// Average entry price over all buy fills.
    pub buy_price: f64,
    /// Price of the most recent exit fill.
    pub sell_price: f64,
    /// Quantity of the parked order. Positive only while an order is pending.
    pub order_qty: f64,
    pub held_qty: f64,
    /// Held quantity the exit split schedule is laid out against.
    pub base_qty: f64,
    pub max_return: f64,
    pub min_return: f64,
    pub buy_index: usize,
    pub buy_time: Option<NaiveDateTime>,
    pub buy_log: Vec<BuyFill>,
    /// Parked limit price of the pending order.
    pub pending_price: f64,
    /// Pending order executes against the book rather than a limit.
    pub pending_market: bool,
    pub pending_reason: Option<SellReason>,
    pub tick_unit: f64,
    pub reprice_count: u32,
    pub split_buys_done: u32,
    pub split_sells_done: u32,
    pub order_time: Option<NaiveDateTime>,
    pub order_deadline: Option<NaiveDateTime>,
}

impl VariantState {
    pub fn is_holding(&self) -> bool {
        matches!(self.phase, Phase::Holding | Phase::PendingSell)
    }

    /// Percent return of `price` against the average entry; 0.0 when flat.
    pub fn return_pct(&self, price: f64) -> f64 {
        if self.buy_price <= 0.0 {
            return 0.0;
        }
        (price - self.buy_price) / self.buy_price * 100.0
    }

    pub fn update_extremes(&mut self, ret: f64) {
        if ret > self.max_return {
            self.max_return = ret;
        }
        if ret < self.min_return {
            self.min_return = ret;
        }
    }

    /// Fold a buy fill into the position. `round` applies market precision to
    /// the new average price.
    pub fn apply_buy(&mut self, fill: BuyFill, index: usize, round: impl Fn(f64) -> f64) {
        let q0 = self.held_qty;
        let total = q0 + fill.quantity;
        if total > 0.0 {
            self.buy_price = round((q0 * self.buy_price + fill.quantity * fill.price) / total);
        }
        self.held_qty = total;
        self.base_qty = total;
        if self.buy_time.is_none() {
            self.buy_time = Some(fill.timestamp);
            self.buy_index = index;
        }
        self.buy_log.push(fill);
        self.split_buys_done += 1;
        self.phase = Phase::Holding;
        self.clear_order();
    }

    pub fn clear_order(&mut self) {
        self.order_qty = 0.0;
        self.pending_price = 0.0;
        self.pending_market = false;
        self.pending_reason = None;
        self.reprice_count = 0;
        self.order_time = None;
        self.order_deadline = None;
    }

    pub fn reset(&mut self) {
        *self = VariantState::default();
    }
}

#[derive(Debug, Clone, Default)]
pub struct DayState {
    pub trade_count: u32,
    pub stop_loss_count: u32,
    pub last_trade_time: Option<NaiveDateTime>,
    pub cooldown_until: Option<NaiveDateTime>,
}

impl DayState {
    pub fn reset(&mut self) {
        *self = DayState::default();
    }

    pub fn in_cooldown(&self, now: NaiveDateTime) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}
