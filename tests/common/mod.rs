#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use ticksweep::domain::engine::{VariantGroup, VariantSpec};
use ticksweep::domain::error::{StrategyError, TickSweepError};
use ticksweep::domain::params::VariantParams;
use ticksweep::domain::replay::TimeWindow;
use ticksweep::domain::strategy::{RuleContext, StrategyRules};
pub use ticksweep::domain::tick::{OrderBookLevel, TickSnapshot, BOOK_LEVELS};
use ticksweep::domain::tick::slice_by_date;
use ticksweep::domain::trade::VariantKey;
use ticksweep::ports::data_port::DataPort;

pub struct MockDataPort {
    pub ticks: HashMap<String, Vec<TickSnapshot>>,
    pub errors: HashMap<String, String>,
    pub fetches: AtomicUsize,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            ticks: HashMap::new(),
            errors: HashMap::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_ticks(mut self, instrument: &str, ticks: Vec<TickSnapshot>) -> Self {
        self.ticks.insert(instrument.to_string(), ticks);
        self
    }

    pub fn with_error(mut self, instrument: &str, reason: &str) -> Self {
        self.errors.insert(instrument.to_string(), reason.to_string());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl DataPort for MockDataPort {
    fn fetch_ticks(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
        time_range: Option<TimeWindow>,
    ) -> Result<Vec<TickSnapshot>, TickSweepError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.errors.get(instrument) {
            return Err(TickSweepError::DataLoad {
                instrument: instrument.to_string(),
                reason: reason.clone(),
            });
        }
        let all = self.ticks.get(instrument).map(Vec::as_slice).unwrap_or(&[]);
        Ok(slice_by_date(all, start, end)
            .iter()
            .filter(|t| time_range.is_none_or(|w| w.contains(t.time())))
            .cloned()
            .collect())
    }

    fn list_instruments(&self) -> Result<Vec<String>, TickSweepError> {
        let mut names: Vec<String> = self
            .ticks
            .keys()
            .chain(self.errors.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// 09:00:00 on 2024-01-`day` plus `secs`.
pub fn ts(day: u32, secs: u32) -> NaiveDateTime {
    date(2024, 1, day).and_hms_opt(9, 0, 0).unwrap() + Duration::seconds(secs as i64)
}

/// Tick with a deep ladder one unit either side of `price`.
pub fn make_tick(day: u32, secs: u32, price: f64) -> TickSnapshot {
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

/// Replace the ladder on one side with explicit `(price, quantity)` levels.
pub fn with_asks(mut tick: TickSnapshot, levels: &[(f64, f64)]) -> TickSnapshot {
    tick.asks = ladder(levels);
    tick
}

pub fn with_bids(mut tick: TickSnapshot, levels: &[(f64, f64)]) -> TickSnapshot {
    tick.bids = ladder(levels);
    tick
}

fn ladder(levels: &[(f64, f64)]) -> [OrderBookLevel; BOOK_LEVELS] {
    let mut out = [OrderBookLevel::default(); BOOK_LEVELS];
    for (slot, &(price, quantity)) in out.iter_mut().zip(levels) {
        *slot = OrderBookLevel::new(price, quantity);
    }
    out
}

/// One tick per second starting at 09:00:00 on `day`.
pub fn make_series(day: u32, prices: &[f64]) -> Vec<TickSnapshot> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| make_tick(day, i as u32, p))
        .collect()
}

/// The same intraday price path repeated on each day in `days`.
pub fn make_days(days: &[u32], prices: &[f64]) -> Vec<TickSnapshot> {
    days.iter().flat_map(|&d| make_series(d, prices)).collect()
}

type NoExit = fn(&RuleContext<'_>) -> Result<bool, StrategyError>;

pub fn always_rules() -> StrategyRules {
    StrategyRules::from_fns("always", |_: &RuleContext<'_>| Ok(true), None::<NoExit>)
}

pub fn never_rules() -> StrategyRules {
    StrategyRules::from_fns("never", |_: &RuleContext<'_>| Ok(false), None::<NoExit>)
}

pub fn failing_rules() -> StrategyRules {
    StrategyRules::from_fns(
        "failing",
        |_: &RuleContext<'_>| Err(StrategyError::new("indicator blew up")),
        None::<NoExit>,
    )
}

pub fn base_params() -> VariantParams {
    VariantParams {
        buy_amount: 10_000.0,
        max_trades_per_day: 1,
        ..Default::default()
    }
}

pub fn make_group(rules: StrategyRules, params: Vec<VariantParams>) -> VariantGroup {
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

pub fn shared<T: DataPort + 'static>(port: T) -> Arc<dyn DataPort> {
    Arc::new(port)
}
