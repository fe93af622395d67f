//! Tick replay engine.
//!
//! One pass over an instrument's ticks advances every variant of a batch.
//! Rolling indicators are pushed once per tick and each group's entry
//! predicate is evaluated at most once per tick, and only when one of its
//! variants is able to enter. Everything else is per-variant bookkeeping on
//! plain structs.
//!
//! ```text
//! Flat -> PendingBuy -> Holding -> PendingSell -> Flat
//!           |                 \______________/
//!           +-> Flat (cancel)   LastSell at day boundary / day end / replay end
//! ```

use std::ops::Range;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, trace};

use super::book_fill::simulate_market_fill;
use super::error::{StrategyError, TickSweepError};
use super::indicator::IndicatorTape;
use super::params::{OrderType, VariantParams};
use super::replay::ReplayConfig;
use super::split::{split_fraction, split_sell_quantity};
use super::strategy::{PositionView, RuleContext, StrategyRules};
use super::tick::{day_boundaries, TickSnapshot};
use super::trade::{BuyFill, SellReason, TradeResult, VariantKey};
use super::variant::{DayState, Phase, VariantState};

/// Quantity below which a position counts as fully closed.
const QTY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct VariantSpec {
    pub key: VariantKey,
    pub params: VariantParams,
}

/// Variants sharing one set of strategy rules.
#[derive(Debug, Clone)]
pub struct VariantGroup {
    pub rules: StrategyRules,
    pub variants: Vec<VariantSpec>,
}

/// Receives what a replay produces.
pub trait ReplayObserver {
    fn on_trade(&mut self, trade: TradeResult) -> Result<(), TickSweepError>;

    fn on_progress(&mut self, _processed: usize, _total: usize) {}

    /// Polled between ticks; `true` abandons the run with `Cancelled`.
    fn should_stop(&mut self) -> bool {
        false
    }
}

impl ReplayObserver for Vec<TradeResult> {
    fn on_trade(&mut self, trade: TradeResult) -> Result<(), TickSweepError> {
        self.push(trade);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub ticks_processed: usize,
    pub trades: usize,
}

struct Slot<'g> {
    key: VariantKey,
    params: &'g VariantParams,
    state: VariantState,
    day: DayState,
}

struct TickView<'t> {
    instrument: &'t str,
    ticks: &'t [TickSnapshot],
    index: usize,
    tape: &'t IndicatorTape,
    past_end: bool,
}

impl<'t> TickView<'t> {
    fn tick(&self) -> &'t TickSnapshot {
        &self.ticks[self.index]
    }

    fn now(&self) -> NaiveDateTime {
        self.tick().timestamp
    }

    fn context(&self, lookback: usize) -> RuleContext<'t> {
        RuleContext::new(self.ticks, self.index, lookback, self.tape)
    }

    fn strategy_error(&self, source: StrategyError) -> TickSweepError {
        TickSweepError::StrategyEvaluation {
            instrument: self.instrument.to_string(),
            tick_index: self.index,
            source,
        }
    }
}

struct Emitter<'o> {
    observer: &'o mut dyn ReplayObserver,
    trades: usize,
}

impl Emitter<'_> {
    fn emit(&mut self, trade: TradeResult) -> Result<(), TickSweepError> {
        trace!(
            variant = %trade.variant,
            reason = %trade.reason,
            price = trade.sell_price,
            qty = trade.quantity,
            "exit fill"
        );
        self.trades += 1;
        self.observer.on_trade(trade)
    }
}

pub struct TickSimulationEngine<'a> {
    config: &'a ReplayConfig,
}

impl<'a> TickSimulationEngine<'a> {
    pub fn new(config: &'a ReplayConfig) -> Self {
        Self { config }
    }

    /// Replay `ticks` (ordered by timestamp) for every variant in `groups`.
    ///
    /// Trades are handed to `observer` as they close. A predicate failure
    /// aborts with `StrategyEvaluation`; a stop request with `Cancelled`.
    pub fn run(
        &self,
        instrument: &str,
        ticks: &[TickSnapshot],
        groups: &[VariantGroup],
        observer: &mut dyn ReplayObserver,
    ) -> Result<ReplayOutcome, TickSweepError> {
        let mut outcome = ReplayOutcome::default();
        if ticks.is_empty() || groups.iter().all(|g| g.variants.is_empty()) {
            return Ok(outcome);
        }
        if self.config.is_blacklisted(instrument) {
            debug!(instrument, "blacklisted, skipping replay");
            return Ok(outcome);
        }

        let mut slots: Vec<Slot<'_>> = Vec::new();
        let mut ranges: Vec<Range<usize>> = Vec::with_capacity(groups.len());
        for group in groups {
            let start = slots.len();
            slots.extend(group.variants.iter().map(|v| Slot {
                key: v.key,
                params: &v.params,
                state: VariantState::default(),
                day: DayState::default(),
            }));
            ranges.push(start..slots.len());
        }

        debug!(
            instrument,
            ticks = ticks.len(),
            variants = slots.len(),
            groups = groups.len(),
            "replay start"
        );

        let mut emitter = Emitter {
            observer,
            trades: 0,
        };
        let mut tape = IndicatorTape::with_capacity(ticks.len());
        let progress_every = self.config.progress_interval.max(1);
        let bounds = day_boundaries(ticks);

        for day in bounds.windows(2) {
            let (start, end) = (day[0], day[1]);
            for slot in slots.iter_mut() {
                slot.state.reset();
                slot.day.reset();
            }

            for index in start..end {
                if emitter.observer.should_stop() {
                    debug!(instrument, index, "replay stopped");
                    return Err(TickSweepError::Cancelled);
                }
                tape.push(&ticks[index]);
                let view = TickView {
                    instrument,
                    ticks,
                    index,
                    tape: &tape,
                    past_end: self.config.past_day_end(ticks[index].time()),
                };

                for (group, range) in groups.iter().zip(ranges.iter()) {
                    let mut entry_signal = None;
                    for slot in slots[range.clone()].iter_mut() {
                        self.step(&view, &group.rules, &mut entry_signal, slot, &mut emitter)?;
                    }
                }

                outcome.ticks_processed += 1;
                if outcome.ticks_processed % progress_every == 0 {
                    emitter
                        .observer
                        .on_progress(outcome.ticks_processed, ticks.len());
                }
            }

            let view = TickView {
                instrument,
                ticks,
                index: end - 1,
                tape: &tape,
                past_end: true,
            };
            for slot in slots.iter_mut() {
                self.liquidate(&view, slot, &mut emitter)?;
            }
        }

        emitter
            .observer
            .on_progress(outcome.ticks_processed, ticks.len());
        outcome.trades = emitter.trades;
        debug!(instrument, trades = outcome.trades, "replay done");
        Ok(outcome)
    }

    fn step(
        &self,
        t: &TickView<'_>,
        rules: &StrategyRules,
        entry_signal: &mut Option<bool>,
        slot: &mut Slot<'_>,
        out: &mut Emitter<'_>,
    ) -> Result<(), TickSweepError> {
        match slot.state.phase {
            Phase::Flat => {
                if t.past_end || !self.can_enter(t, slot) {
                    return Ok(());
                }
                if self.entry_signal(t, rules, entry_signal)? {
                    self.open_entry(t, slot);
                }
                Ok(())
            }
            Phase::PendingBuy => {
                self.work_pending_buy(t, slot);
                Ok(())
            }
            Phase::Holding | Phase::PendingSell => {
                if t.past_end {
                    return self.liquidate(t, slot, out);
                }
                let price = t.tick().price;
                let ret = slot.state.return_pct(price);
                slot.state.update_extremes(ret);

                if slot.params.stop_loss_pct > 0.0 && ret <= -slot.params.stop_loss_pct {
                    return self.stop_loss(t, slot, out);
                }
                if slot.state.phase == Phase::PendingSell {
                    return self.work_pending_sell(t, slot, out);
                }
                self.skip_empty_split_sells(slot, ret);
                if let Some((qty, reason)) = self.exit_decision(t, rules, slot, ret)? {
                    return self.place_sell(t, slot, qty, reason, out);
                }
                self.split_buy(t, slot, ret);
                Ok(())
            }
        }
    }

    fn entry_signal(
        &self,
        t: &TickView<'_>,
        rules: &StrategyRules,
        cache: &mut Option<bool>,
    ) -> Result<bool, TickSweepError> {
        if let Some(signal) = *cache {
            return Ok(signal);
        }
        let ctx = t.context(self.config.lookback_ticks);
        let signal = rules
            .entry
            .evaluate(&ctx)
            .map_err(|e| t.strategy_error(e))?;
        *cache = Some(signal);
        Ok(signal)
    }

    fn can_enter(&self, t: &TickView<'_>, slot: &Slot<'_>) -> bool {
        let tick = t.tick();
        let now = tick.timestamp;
        let p = slot.params;
        let day = &slot.day;

        if !tick.in_watchlist || self.config.in_forbidden_window(tick.time()) {
            return false;
        }
        if self.config.price_floor > 0.0 && tick.price < self.config.price_floor {
            return false;
        }
        if p.max_trades_per_day > 0 && day.trade_count >= p.max_trades_per_day {
            return false;
        }
        if p.max_stop_losses_per_day > 0 && day.stop_loss_count >= p.max_stop_losses_per_day {
            return false;
        }
        if day.in_cooldown(now) {
            return false;
        }
        if p.reentry_interval_secs > 0
            && day
                .last_trade_time
                .is_some_and(|last| (now - last).num_seconds() < p.reentry_interval_secs)
        {
            return false;
        }
        true
    }

    fn open_entry(&self, t: &TickView<'_>, slot: &mut Slot<'_>) {
        let market = self.config.market;
        let tick = t.tick();
        let p = slot.params;
        let unit = market.tick_unit(tick.price);
        let budget = p.buy_amount * split_fraction(p.split_buy_method, p.split_buy_count.max(1), 0);

        let (price, is_market) = match p.buy_order {
            OrderType::Market => (
                tick.best_ask().map(|l| l.price).unwrap_or(tick.price),
                true,
            ),
            OrderType::Limit => (
                market.snap_to_tick(tick.price + p.buy_offset_ticks as f64 * unit),
                false,
            ),
        };
        if price <= 0.0 {
            return;
        }
        let qty = market.floor_quantity(budget / price);
        if qty <= 0.0 {
            return;
        }

        let now = t.now();
        let state = &mut slot.state;
        state.phase = Phase::PendingBuy;
        state.tick_unit = unit;
        state.order_qty = qty;
        state.pending_market = is_market;
        state.pending_price = if is_market { 0.0 } else { price };
        state.reprice_count = 0;
        state.order_time = Some(now);
        state.order_deadline = deadline(now, p.order_timeout_secs);

        if is_market {
            self.try_market_buy(t, slot);
        }
    }

    /// Fill the pending buy against the ask ladder. `false` when depth is short.
    fn try_market_buy(&self, t: &TickView<'_>, slot: &mut Slot<'_>) -> bool {
        let tick = t.tick();
        let Some(fill) = simulate_market_fill(
            &tick.asks,
            slot.state.order_qty,
            self.config.effective_depth(),
        ) else {
            return false;
        };
        let price = self.config.market.round_price(fill.price);
        self.record_buy(t, slot, price, fill.quantity);
        true
    }

    fn record_buy(&self, t: &TickView<'_>, slot: &mut Slot<'_>, price: f64, quantity: f64) {
        let market = self.config.market;
        let first = slot.state.split_buys_done == 0;
        slot.state.apply_buy(
            BuyFill {
                timestamp: t.now(),
                price,
                quantity,
            },
            t.index,
            |p| market.round_price(p),
        );
        if first {
            slot.day.trade_count += 1;
            slot.day.last_trade_time = Some(t.now());
        }
    }

    fn work_pending_buy(&self, t: &TickView<'_>, slot: &mut Slot<'_>) {
        let tick = t.tick();
        let now = t.now();
        if t.past_end || !tick.in_watchlist || timed_out(slot.state.order_deadline, now) {
            slot.state.reset();
            return;
        }

        let p = slot.params;
        if slot.state.pending_market {
            if self.try_market_buy(t, slot) {
                return;
            }
            slot.state.reprice_count += 1;
            if slot.state.reprice_count > p.max_reprices {
                slot.state.reset();
            }
            return;
        }

        let limit = slot.state.pending_price;
        if tick.price <= limit {
            let qty = slot.state.order_qty;
            self.record_buy(t, slot, limit, qty);
            return;
        }

        let market = self.config.market;
        let unit = market.tick_unit(limit);
        if slot.state.reprice_count < p.max_reprices {
            let nudged = (limit + p.reprice_step_ticks as f64 * unit).min(tick.price);
            slot.state.pending_price = market.round_price(nudged);
            slot.state.tick_unit = unit;
            slot.state.reprice_count += 1;
        } else if tick.price - limit > p.cancel_ticks as f64 * unit {
            slot.state.reset();
        }
    }

    fn exit_decision(
        &self,
        t: &TickView<'_>,
        rules: &StrategyRules,
        slot: &Slot<'_>,
        ret: f64,
    ) -> Result<Option<(f64, SellReason)>, TickSweepError> {
        let p = slot.params;
        let state = &slot.state;
        let held = state.held_qty;

        if p.take_profit_pct > 0.0 && ret >= p.take_profit_pct {
            return Ok(Some((held, SellReason::TakeProfit)));
        }
        if p.trailing_stop_pct > 0.0
            && state.max_return > 0.0
            && state.max_return - ret >= p.trailing_stop_pct
        {
            return Ok(Some((held, SellReason::TrailingStop)));
        }
        let done = state.split_sells_done;
        if p.split_sell_count > 1
            && p.split_sell_step_pct > 0.0
            && done < p.split_sell_count
            && ret >= p.split_sell_step_pct * (done + 1) as f64
        {
            let qty = split_sell_quantity(
                self.config.market,
                p.split_sell_method,
                p.split_sell_count,
                done,
                state.base_qty,
                held,
            );
            if qty > 0.0 {
                return Ok(Some((qty, SellReason::SplitSell)));
            }
        }
        if let Some(exit) = &rules.exit {
            let view = PositionView {
                buy_price: state.buy_price,
                held_qty: held,
                return_pct: ret,
                max_return: state.max_return,
                min_return: state.min_return,
                hold_secs: state
                    .buy_time
                    .map(|b| (t.now() - b).num_seconds())
                    .unwrap_or(0),
            };
            let ctx = t.context(self.config.lookback_ticks).with_position(view);
            if exit.evaluate(&ctx).map_err(|e| t.strategy_error(e))? {
                return Ok(Some((held, SellReason::ExitSignal)));
            }
        }
        Ok(None)
    }

    /// Step past reached exit tranches whose share floors to nothing, so a
    /// small position still gets to the final tranche and its remainder.
    fn skip_empty_split_sells(&self, slot: &mut Slot<'_>, ret: f64) {
        let p = slot.params;
        if p.split_sell_count <= 1 || p.split_sell_step_pct <= 0.0 {
            return;
        }
        let state = &mut slot.state;
        while state.split_sells_done + 1 < p.split_sell_count
            && ret >= p.split_sell_step_pct * (state.split_sells_done + 1) as f64
            && split_sell_quantity(
                self.config.market,
                p.split_sell_method,
                p.split_sell_count,
                state.split_sells_done,
                state.base_qty,
                state.held_qty,
            ) <= 0.0
        {
            trace!(variant = %slot.key, tranche = state.split_sells_done, "empty split sell skipped");
            state.split_sells_done += 1;
        }
    }

    /// Buy the next entry tranche once return has fallen far enough.
    /// Always at market; a thin ladder just means trying again next tick.
    fn split_buy(&self, t: &TickView<'_>, slot: &mut Slot<'_>, ret: f64) {
        let p = slot.params;
        let done = slot.state.split_buys_done;
        if p.split_buy_count <= 1 || p.split_buy_gap_pct <= 0.0 || done >= p.split_buy_count {
            return;
        }
        if ret > -(p.split_buy_gap_pct * done as f64) {
            return;
        }
        let tick = t.tick();
        if !tick.in_watchlist {
            return;
        }
        let market = self.config.market;
        let budget = p.buy_amount * split_fraction(p.split_buy_method, p.split_buy_count, done);
        let reference = tick.best_ask().map(|l| l.price).unwrap_or(tick.price);
        if reference <= 0.0 {
            return;
        }
        let qty = market.floor_quantity(budget / reference);
        if let Some(fill) = simulate_market_fill(&tick.asks, qty, self.config.effective_depth()) {
            self.record_buy(t, slot, market.round_price(fill.price), fill.quantity);
        }
    }

    fn place_sell(
        &self,
        t: &TickView<'_>,
        slot: &mut Slot<'_>,
        qty: f64,
        reason: SellReason,
        out: &mut Emitter<'_>,
    ) -> Result<(), TickSweepError> {
        let market = self.config.market;
        let tick = t.tick();
        let now = t.now();
        let p = slot.params;
        let state = &mut slot.state;

        state.phase = Phase::PendingSell;
        state.order_qty = qty;
        state.pending_reason = Some(reason);
        state.reprice_count = 0;
        state.order_time = Some(now);
        state.order_deadline = deadline(now, p.order_timeout_secs);

        match p.sell_order {
            OrderType::Market => {
                state.pending_market = true;
                state.pending_price = 0.0;
                self.try_market_sell(t, slot, out)?;
            }
            OrderType::Limit => {
                let unit = market.tick_unit(tick.price);
                let limit = market.snap_to_tick(tick.price + p.sell_offset_ticks as f64 * unit);
                state.pending_market = false;
                state.tick_unit = unit;
                state.pending_price = if limit > 0.0 { limit } else { tick.price };
            }
        }
        Ok(())
    }

    /// Fill the pending sell against the bid ladder. `false` when depth is short.
    fn try_market_sell(
        &self,
        t: &TickView<'_>,
        slot: &mut Slot<'_>,
        out: &mut Emitter<'_>,
    ) -> Result<bool, TickSweepError> {
        let Some(fill) = simulate_market_fill(
            &t.tick().bids,
            slot.state.order_qty,
            self.config.effective_depth(),
        ) else {
            return Ok(false);
        };
        let price = self.config.market.round_price(fill.price);
        let qty = slot.state.order_qty;
        let reason = slot.state.pending_reason.unwrap_or(SellReason::ExitSignal);
        self.close(t, slot, price, qty, reason, out)?;
        Ok(true)
    }

    fn work_pending_sell(
        &self,
        t: &TickView<'_>,
        slot: &mut Slot<'_>,
        out: &mut Emitter<'_>,
    ) -> Result<(), TickSweepError> {
        let tick = t.tick();
        let p = slot.params;
        let reason = slot.state.pending_reason.unwrap_or(SellReason::ExitSignal);

        if slot.state.pending_market {
            if self.try_market_sell(t, slot, out)? {
                return Ok(());
            }
            slot.state.reprice_count += 1;
            if slot.state.reprice_count > p.max_reprices {
                let qty = slot.state.order_qty;
                let price = self.config.market.round_price(tick.price);
                self.close(t, slot, price, qty, reason, out)?;
            }
            return Ok(());
        }

        let limit = slot.state.pending_price;
        if tick.price >= limit {
            let qty = slot.state.order_qty;
            return self.close(t, slot, limit, qty, reason, out);
        }

        if timed_out(slot.state.order_deadline, t.now()) || slot.state.reprice_count >= p.max_reprices {
            slot.state.pending_market = true;
            slot.state.pending_price = 0.0;
            slot.state.reprice_count = 0;
            self.try_market_sell(t, slot, out)?;
            return Ok(());
        }

        let market = self.config.market;
        let unit = market.tick_unit(limit);
        let nudged = (limit - p.reprice_step_ticks as f64 * unit).max(tick.price);
        slot.state.pending_price = market.round_price(nudged);
        slot.state.tick_unit = unit;
        slot.state.reprice_count += 1;
        Ok(())
    }

    fn stop_loss(
        &self,
        t: &TickView<'_>,
        slot: &mut Slot<'_>,
        out: &mut Emitter<'_>,
    ) -> Result<(), TickSweepError> {
        let qty = slot.state.held_qty;
        let price = self.book_or_last(t.tick(), qty);
        self.close(t, slot, price, qty, SellReason::StopLoss, out)?;
        let now = t.now();
        slot.day.stop_loss_count += 1;
        if slot.params.stop_loss_cooldown_secs > 0 {
            slot.day.cooldown_until = Some(now + Duration::seconds(slot.params.stop_loss_cooldown_secs));
        }
        Ok(())
    }

    /// Forced liquidation. Holding variants sell everything; a pending entry
    /// with nothing held is dropped without a trade.
    fn liquidate(
        &self,
        t: &TickView<'_>,
        slot: &mut Slot<'_>,
        out: &mut Emitter<'_>,
    ) -> Result<(), TickSweepError> {
        match slot.state.phase {
            Phase::Flat => Ok(()),
            Phase::PendingBuy => {
                slot.state.reset();
                Ok(())
            }
            Phase::Holding | Phase::PendingSell => {
                let qty = slot.state.held_qty;
                let price = self.book_or_last(t.tick(), qty);
                self.close(t, slot, price, qty, SellReason::LastSell, out)
            }
        }
    }

    /// Market sell price against the bids, falling back to the last price.
    fn book_or_last(&self, tick: &TickSnapshot, qty: f64) -> f64 {
        let price = simulate_market_fill(&tick.bids, qty, self.config.effective_depth())
            .map(|f| f.price)
            .unwrap_or(tick.price);
        self.config.market.round_price(price)
    }

    fn close(
        &self,
        t: &TickView<'_>,
        slot: &mut Slot<'_>,
        price: f64,
        qty: f64,
        reason: SellReason,
        out: &mut Emitter<'_>,
    ) -> Result<(), TickSweepError> {
        let now = t.now();
        let state = &mut slot.state;
        let qty = qty.min(state.held_qty);
        let buy_time = state.buy_time.unwrap_or(now);
        let remaining = state.held_qty - qty;
        let fully_closed = remaining <= QTY_EPSILON;
        let buy_amount = state.buy_price * qty;
        let sell_amount = price * qty;

        let trade = TradeResult {
            instrument: t.instrument.to_string(),
            variant: slot.key,
            buy_time,
            sell_time: now,
            hold_secs: (now - buy_time).num_seconds(),
            buy_price: state.buy_price,
            sell_price: price,
            quantity: qty,
            buy_amount,
            sell_amount,
            profit_ratio: state.return_pct(price),
            profit_amount: sell_amount - buy_amount,
            reason,
            buy_log: state.buy_log.clone(),
            fully_closed,
        };

        if fully_closed {
            state.reset();
            slot.day.last_trade_time = Some(now);
        } else {
            state.held_qty = remaining;
            state.sell_price = price;
            if reason == SellReason::SplitSell {
                state.split_sells_done += 1;
            }
            state.phase = Phase::Holding;
            state.clear_order();
        }
        out.emit(trade)
    }
}

fn deadline(now: NaiveDateTime, timeout_secs: i64) -> Option<NaiveDateTime> {
    (timeout_secs > 0).then(|| now + Duration::seconds(timeout_secs))
}

fn timed_out(deadline: Option<NaiveDateTime>, now: NaiveDateTime) -> bool {
    deadline.is_some_and(|d| now >= d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::StrategyError;
    use crate::domain::market::Market;
    use crate::domain::replay::TimeWindow;
    use crate::domain::split::SplitMethod;
    use crate::domain::tick::{OrderBookLevel, BOOK_LEVELS};
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ts(day: u32, secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + Duration::seconds(secs as i64)
    }

    /// Tick with a deep symmetric ladder one unit either side of `price`.
    fn tick(day: u32, secs: u32, price: f64) -> TickSnapshot {
        let mut asks = [OrderBookLevel::default(); BOOK_LEVELS];
        let mut bids = [OrderBookLevel::default(); BOOK_LEVELS];
        for i in 0..BOOK_LEVELS {
            asks[i] = OrderBookLevel::new(price + 1.0 + i as f64, 1_000.0);
            bids[i] = OrderBookLevel::new(price - 1.0 - i as f64, 1_000.0);
        }
        TickSnapshot {
            timestamp: ts(day, secs),
            price,
            open: price,
            high: price,
            low: price,
            change_pct: 0.0,
            turnover: 0.0,
            strength: 100.0,
            buy_volume: 0.0,
            sell_volume: 0.0,
            moving_averages: vec![],
            asks,
            bids,
            in_watchlist: true,
        }
    }

    fn series(day: u32, prices: &[f64]) -> Vec<TickSnapshot> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| tick(day, i as u32, p))
            .collect()
    }

    fn always() -> StrategyRules {
        StrategyRules::from_fns(
            "always",
            |_: &RuleContext<'_>| Ok(true),
            None::<fn(&RuleContext<'_>) -> Result<bool, StrategyError>>,
        )
    }

    fn group(rules: StrategyRules, params: Vec<VariantParams>) -> VariantGroup {
        VariantGroup {
            rules,
            variants: params
                .into_iter()
                .enumerate()
                .map(|(i, params)| VariantSpec {
                    key: VariantKey::new(0, i),
                    params,
                })
                .collect(),
        }
    }

    fn params() -> VariantParams {
        VariantParams {
            buy_amount: 10_000.0,
            ..Default::default()
        }
    }

    fn replay(cfg: &ReplayConfig, ticks: &[TickSnapshot], groups: &[VariantGroup]) -> Vec<TradeResult> {
        let mut trades = Vec::new();
        TickSimulationEngine::new(cfg)
            .run("TEST", ticks, groups, &mut trades)
            .unwrap();
        trades
    }

    #[test]
    fn market_entry_then_take_profit() {
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 100.0, 103.0, 104.0]);
        let p = VariantParams {
            take_profit_pct: 2.0,
            max_trades_per_day: 1,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        assert_eq!(trades.len(), 1);
        let t = &trades[0];
        // entry at ask 101: floor(10000 / 101) = 99 shares
        assert_eq!(t.buy_price, 101.0);
        assert_eq!(t.quantity, 99.0);
        // 103 is +1.98%, 104 is +2.97%: sold at bid 103
        assert_eq!(t.reason, SellReason::TakeProfit);
        assert_eq!(t.sell_price, 103.0);
        assert!(t.fully_closed);
        approx::assert_relative_eq!(t.profit_amount, 2.0 * 99.0);
    }

    #[test]
    fn holding_is_liquidated_at_replay_end() {
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 101.0, 102.0]);
        let p = VariantParams {
            max_trades_per_day: 1,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, SellReason::LastSell);
        assert_eq!(trades[0].sell_price, 101.0);
        assert_eq!(trades[0].sell_time, ts(2, 2));
    }

    #[test]
    fn day_boundary_liquidates_and_resets_day_limits() {
        let cfg = ReplayConfig::default();
        let mut ticks = series(2, &[100.0, 101.0]);
        ticks.extend(series(3, &[200.0, 201.0]));
        let p = VariantParams {
            max_trades_per_day: 1,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        assert_eq!(trades.len(), 2);
        assert!(trades.iter().all(|t| t.reason == SellReason::LastSell));
        assert_eq!(trades[0].sell_time, ts(2, 1));
        assert_eq!(trades[1].buy_time, ts(3, 0));
    }

    #[test]
    fn day_end_time_forces_exit_and_blocks_entries() {
        let cfg = ReplayConfig {
            day_end_time: Some(NaiveTime::from_hms_opt(9, 0, 2).unwrap()),
            ..Default::default()
        };
        let ticks = series(2, &[100.0, 100.0, 100.0, 100.0]);
        let trades = replay(&cfg, &ticks, &[group(always(), vec![params()])]);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].sell_time, ts(2, 2));
    }

    #[test]
    fn stop_loss_sells_at_market_and_starts_cooldown() {
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 95.0, 96.0, 97.0]);
        let p = VariantParams {
            stop_loss_pct: 2.0,
            stop_loss_cooldown_secs: 60,
            sell_order: OrderType::Limit,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, SellReason::StopLoss);
        // bid one below 95
        assert_eq!(trades[0].sell_price, 94.0);
    }

    #[test]
    fn stop_loss_limit_blocks_further_entries() {
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 95.0, 100.0, 95.0, 100.0]);
        let p = VariantParams {
            stop_loss_pct: 2.0,
            max_stop_losses_per_day: 1,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        assert_eq!(trades.len(), 1);
    }

    #[test]
    fn thin_ladder_buy_retries_then_cancels() {
        let cfg = ReplayConfig::default();
        let mut ticks = series(2, &[100.0, 100.0, 100.0, 100.0]);
        for t in ticks.iter_mut() {
            for level in t.asks.iter_mut() {
                level.quantity = 1.0;
            }
        }
        let p = VariantParams {
            max_reprices: 2,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        assert!(trades.is_empty());
    }

    #[test]
    fn limit_buy_fills_when_price_reaches_limit() {
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 99.0, 98.0, 98.0]);
        let p = VariantParams {
            buy_order: OrderType::Limit,
            buy_offset_ticks: -2,
            max_reprices: 0,
            cancel_ticks: 100,
            max_trades_per_day: 1,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buy_price, 98.0);
        assert_eq!(trades[0].buy_time, ts(2, 2));
    }

    #[test]
    fn pending_limit_buy_is_cancelled_without_trade() {
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 100.0, 100.0]);
        let p = VariantParams {
            buy_order: OrderType::Limit,
            buy_offset_ticks: -10,
            max_reprices: 0,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        assert!(trades.is_empty());
    }

    #[test]
    fn split_sells_then_exact_remainder() {
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 103.0, 104.0, 106.0, 107.0]);
        let p = VariantParams {
            split_sell_count: 3,
            split_sell_method: SplitMethod::Equal,
            split_sell_step_pct: 1.0,
            max_trades_per_day: 1,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        // 99 shares at 101; tranches of 33, 33, then the remaining 33
        assert_eq!(trades.len(), 3);
        assert!(trades.iter().all(|t| t.reason == SellReason::SplitSell));
        let sold: f64 = trades.iter().map(|t| t.quantity).sum();
        assert_eq!(sold, 99.0);
        assert!(!trades[0].fully_closed);
        assert!(trades[2].fully_closed);
    }

    #[test]
    fn small_position_still_reaches_final_split_sell() {
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 103.0, 104.0, 105.0, 106.0]);
        let p = VariantParams {
            buy_amount: 250.0,
            split_sell_count: 3,
            split_sell_method: SplitMethod::Equal,
            split_sell_step_pct: 1.0,
            max_trades_per_day: 1,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        // 2 shares at 101: the first two tranches floor to 0 and are
        // stepped over; +3.96% at 105 reaches the last one
        assert_eq!(trades.len(), 1);
        let t = &trades[0];
        assert_eq!(t.reason, SellReason::SplitSell);
        assert_eq!(t.quantity, 2.0);
        assert_eq!(t.sell_price, 104.0);
        assert_eq!(t.sell_time, ts(2, 3));
        assert!(t.fully_closed);
    }

    #[test]
    fn split_buy_averages_down() {
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 97.0, 98.0]);
        let p = VariantParams {
            buy_amount: 20_000.0,
            split_buy_count: 2,
            split_buy_gap_pct: 3.0,
            max_trades_per_day: 1,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        assert_eq!(trades.len(), 1);
        let t = &trades[0];
        assert_eq!(t.buy_log.len(), 2);
        // 99 @ 101 then floor(10000 / 98) = 102 @ 98
        assert_eq!(t.quantity, 201.0);
        assert_eq!(t.buy_price, ((99.0 * 101.0 + 102.0 * 98.0) / 201.0f64).round());
    }

    #[test]
    fn forbidden_window_and_watchlist_block_entry() {
        let cfg = ReplayConfig {
            forbidden_windows: vec![TimeWindow::new(
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(9, 0, 2).unwrap(),
            )],
            ..Default::default()
        };
        let mut ticks = series(2, &[100.0, 100.0, 100.0, 100.0]);
        ticks[2].in_watchlist = false;
        let trades = replay(&cfg, &ticks, &[group(always(), vec![params()])]);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buy_time, ts(2, 3));
    }

    #[test]
    fn entry_predicate_runs_once_per_group_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let rules = StrategyRules::from_fns(
            "never",
            move |_: &RuleContext<'_>| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            },
            None::<fn(&RuleContext<'_>) -> Result<bool, StrategyError>>,
        );
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 100.0, 100.0]);
        let g = group(rules, vec![params(), params(), params()]);
        let trades = replay(&cfg, &ticks, &[g]);
        assert!(trades.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn predicate_failure_aborts_run() {
        let rules = StrategyRules::from_fns(
            "broken",
            |_: &RuleContext<'_>| Err(StrategyError::new("boom")),
            None::<fn(&RuleContext<'_>) -> Result<bool, StrategyError>>,
        );
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0]);
        let mut trades = Vec::new();
        let err = TickSimulationEngine::new(&cfg)
            .run("TEST", &ticks, &[group(rules, vec![params()])], &mut trades)
            .unwrap_err();
        assert!(matches!(
            err,
            TickSweepError::StrategyEvaluation { tick_index: 0, .. }
        ));
        assert!(trades.is_empty());
    }

    #[test]
    fn blacklisted_instrument_never_trades() {
        let mut cfg = ReplayConfig::default();
        cfg.blacklist.insert("TEST".to_string());
        let ticks = series(2, &[100.0, 101.0]);
        let trades = replay(&cfg, &ticks, &[group(always(), vec![params()])]);
        assert!(trades.is_empty());
    }

    #[test]
    fn crypto_precision_quantities() {
        let cfg = ReplayConfig {
            market: Market::Crypto,
            ..Default::default()
        };
        let ticks = series(2, &[30_000.0, 30_000.0]);
        let p = VariantParams {
            buy_amount: 1_000.0,
            max_trades_per_day: 1,
            ..params()
        };
        let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);
        assert_eq!(trades.len(), 1);
        assert!(trades[0].quantity > 0.0 && trades[0].quantity < 1.0);
    }

    proptest! {
        #[test]
        fn sold_quantity_matches_bought_quantity(
            steps in prop::collection::vec(-4i32..=4, 4..80),
            buy_amount in 150.0f64..30_000.0,
            split_buy_count in 1u32..4,
            split_buy_gap_pct in 0.5f64..4.0,
            split_sell_count in 1u32..5,
            split_sell_step_pct in 0.5f64..3.0,
            stop_loss_pct in prop::sample::select(vec![0.0, 2.0, 6.0]),
            limit_buy in any::<bool>(),
            limit_sell in any::<bool>(),
        ) {
            let mut price = 100.0;
            let prices: Vec<f64> = steps
                .iter()
                .map(|&s| {
                    price = (price + s as f64).max(20.0);
                    price
                })
                .collect();
            let half = prices.len() / 2;
            let mut ticks = series(2, &prices[..half]);
            ticks.extend(series(3, &prices[half..]));

            let order = |limit: bool| if limit { OrderType::Limit } else { OrderType::Market };
            let p = VariantParams {
                buy_amount,
                buy_order: order(limit_buy),
                sell_order: order(limit_sell),
                buy_offset_ticks: -1,
                sell_offset_ticks: 1,
                stop_loss_pct,
                split_buy_count,
                split_buy_gap_pct,
                split_sell_count,
                split_sell_step_pct,
                ..params()
            };
            let cfg = ReplayConfig::default();
            let trades = replay(&cfg, &ticks, &[group(always(), vec![p])]);

            let mut sold = 0.0;
            for t in &trades {
                prop_assert!(t.quantity > 0.0);
                sold += t.quantity;
                if t.fully_closed {
                    let bought: f64 = t.buy_log.iter().map(|b| b.quantity).sum();
                    prop_assert!((bought - sold).abs() < 1e-9, "bought {} sold {}", bought, sold);
                    sold = 0.0;
                }
            }
            // replay end liquidates, so nothing is left open
            prop_assert_eq!(sold, 0.0);
        }
    }

    struct StopAfter(usize);

    impl ReplayObserver for StopAfter {
        fn on_trade(&mut self, _trade: TradeResult) -> Result<(), TickSweepError> {
            Ok(())
        }

        fn should_stop(&mut self) -> bool {
            if self.0 == 0 {
                return true;
            }
            self.0 -= 1;
            false
        }
    }

    #[test]
    fn stop_request_cancels() {
        let cfg = ReplayConfig::default();
        let ticks = series(2, &[100.0, 100.0, 100.0]);
        let err = TickSimulationEngine::new(&cfg)
            .run("TEST", &ticks, &[group(always(), vec![params()])], &mut StopAfter(1))
            .unwrap_err();
        assert!(matches!(err, TickSweepError::Cancelled));
    }
}
