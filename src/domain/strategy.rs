//! Strategy predicates and the context they evaluate against.
//!
//! The engine only knows the [`Predicate`] trait. The rule language in
//! [`rule`](super::rule) is one implementation; tests and embedders can plug in
//! closures through [`FnPredicate`].

use std::fmt;
use std::sync::Arc;

use super::error::StrategyError;
use super::indicator::IndicatorTape;
use super::tick::TickSnapshot;

/// Read-only view of a variant's open position, handed to exit predicates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionView {
    pub buy_price: f64,
    pub held_qty: f64,
    pub return_pct: f64,
    pub max_return: f64,
    pub min_return: f64,
    pub hold_secs: i64,
}

/// Everything a predicate may look at for one tick.
///
/// `window` is the bounded look-back ending at the current tick; `base` is the
/// replay index of `window[0]`, which is also its index on `tape`.
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    pub window: &'a [TickSnapshot],
    pub base: usize,
    pub tape: &'a IndicatorTape,
    pub position: Option<PositionView>,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        ticks: &'a [TickSnapshot],
        index: usize,
        lookback: usize,
        tape: &'a IndicatorTape,
    ) -> Self {
        let start = (index + 1).saturating_sub(lookback.max(1));
        Self {
            window: &ticks[start..=index],
            base: start,
            tape,
            position: None,
        }
    }

    pub fn with_position(mut self, position: PositionView) -> Self {
        self.position = Some(position);
        self
    }

    /// Replay index of the current tick.
    pub fn index(&self) -> usize {
        self.base + self.window.len() - 1
    }

    pub fn tick(&self) -> &'a TickSnapshot {
        &self.window[self.window.len() - 1]
    }

    /// Tick `back` steps before the current one, if still inside the window.
    pub fn tick_back(&self, back: usize) -> Option<&'a TickSnapshot> {
        let len = self.window.len();
        if back >= len {
            None
        } else {
            Some(&self.window[len - 1 - back])
        }
    }
}

pub trait Predicate: Send + Sync {
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<bool, StrategyError>;
}

/// Adapts a closure into a [`Predicate`].
pub struct FnPredicate<F>(pub F);

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&RuleContext<'_>) -> Result<bool, StrategyError> + Send + Sync,
{
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<bool, StrategyError> {
        (self.0)(ctx)
    }
}

/// Entry and optional exit predicate shared by one variant group.
#[derive(Clone)]
pub struct StrategyRules {
    pub name: String,
    pub entry: Arc<dyn Predicate>,
    pub exit: Option<Arc<dyn Predicate>>,
}

impl StrategyRules {
    pub fn new(name: impl Into<String>, entry: Arc<dyn Predicate>) -> Self {
        Self {
            name: name.into(),
            entry,
            exit: None,
        }
    }

    pub fn with_exit(mut self, exit: Arc<dyn Predicate>) -> Self {
        self.exit = Some(exit);
        self
    }

    /// Rules built from closures; handy for embedding and tests.
    pub fn from_fns<E, X>(name: impl Into<String>, entry: E, exit: Option<X>) -> Self
    where
        E: Fn(&RuleContext<'_>) -> Result<bool, StrategyError> + Send + Sync + 'static,
        X: Fn(&RuleContext<'_>) -> Result<bool, StrategyError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            entry: Arc::new(FnPredicate(entry)),
            exit: exit.map(|f| Arc::new(FnPredicate(f)) as Arc<dyn Predicate>),
        }
    }
}

impl fmt::Debug for StrategyRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRules")
            .field("name", &self.name)
            .field("has_exit", &self.exit.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tick::{OrderBookLevel, BOOK_LEVELS};
    use chrono::NaiveDate;

    fn ticks(prices: &[f64]) -> Vec<TickSnapshot> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| TickSnapshot {
                timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                    .unwrap()
                    .and_hms_opt(9, 0, i as u32)
                    .unwrap(),
                price: p,
                open: p,
                high: p,
                low: p,
                change_pct: 0.0,
                turnover: 0.0,
                strength: 100.0,
                buy_volume: 0.0,
                sell_volume: 0.0,
                moving_averages: Vec::new(),
                asks: [OrderBookLevel::default(); BOOK_LEVELS],
                bids: [OrderBookLevel::default(); BOOK_LEVELS],
                in_watchlist: true,
            })
            .collect()
    }

    #[test]
    fn context_window_is_bounded() {
        let data = ticks(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let tape = IndicatorTape::new();
        let ctx = RuleContext::new(&data, 4, 2, &tape);
        assert_eq!(ctx.window.len(), 2);
        assert_eq!(ctx.base, 3);
        assert_eq!(ctx.index(), 4);
        assert_eq!(ctx.tick().price, 5.0);
        assert_eq!(ctx.tick_back(1).map(|t| t.price), Some(4.0));
        assert!(ctx.tick_back(2).is_none());
    }

    #[test]
    fn closure_predicates() {
        let data = ticks(&[10.0, 20.0]);
        let tape = IndicatorTape::new();
        let rules = StrategyRules::from_fns(
            "closure",
            |ctx: &RuleContext<'_>| Ok(ctx.tick().price > 15.0),
            Some(|ctx: &RuleContext<'_>| Ok(ctx.position.is_some())),
        );
        let ctx = RuleContext::new(&data, 1, 10, &tape);
        assert!(rules.entry.evaluate(&ctx).unwrap());
        let exit = rules.exit.as_ref().unwrap();
        assert!(!exit.evaluate(&ctx).unwrap());
        let view = PositionView {
            buy_price: 10.0,
            held_qty: 1.0,
            return_pct: 100.0,
            max_return: 100.0,
            min_return: 0.0,
            hold_secs: 1,
        };
        assert!(exit.evaluate(&ctx.with_position(view)).unwrap());
    }
}
