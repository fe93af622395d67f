//! Rule evaluation against the replay context.
//!
//! # Evaluation semantics
//!
//! - Rules are evaluated `back` ticks before the current one (0 = current)
//! - Anything outside the look-back window resolves to NaN, so comparisons on
//!   it are false
//! - `CROSS_ABOVE`/`CROSS_BELOW` need the previous tick; false without it
//! - `AND` short-circuits on the first `false`, `OR` on the first `true`
//! - `CONSECUTIVE(rule, N)`: child true on each of the last N ticks
//! - `ANY_OF(rule, N)`: child true at least once in the last N ticks
//! - A missing moving-average column, or a position field read without an
//!   open position, is a [`StrategyError`]

use crate::domain::error::StrategyError;
use crate::domain::rule::{IndicatorRef, Operand, Rule};
use crate::domain::strategy::{PositionView, Predicate, RuleContext};
use crate::domain::tick::OrderBookLevel;

const EPSILON: f64 = 1e-9;

impl Predicate for Rule {
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<bool, StrategyError> {
        evaluate(self, ctx, 0)
    }
}

pub fn evaluate(rule: &Rule, ctx: &RuleContext<'_>, back: usize) -> Result<bool, StrategyError> {
    match rule {
        Rule::CrossAbove { left, right } => {
            if ctx.tick_back(back + 1).is_none() {
                return Ok(false);
            }
            let (l, r) = pair(left, right, ctx, back)?;
            let (lp, rp) = pair(left, right, ctx, back + 1)?;
            Ok(l > r && lp <= rp)
        }
        Rule::CrossBelow { left, right } => {
            if ctx.tick_back(back + 1).is_none() {
                return Ok(false);
            }
            let (l, r) = pair(left, right, ctx, back)?;
            let (lp, rp) = pair(left, right, ctx, back + 1)?;
            Ok(l < r && lp >= rp)
        }
        Rule::Above { left, right } => {
            let (l, r) = pair(left, right, ctx, back)?;
            Ok(l > r)
        }
        Rule::Below { left, right } => {
            let (l, r) = pair(left, right, ctx, back)?;
            Ok(l < r)
        }
        Rule::Between {
            operand,
            lower,
            upper,
        } => {
            let v = resolve_operand(operand, ctx, back)?;
            Ok(v >= *lower && v <= *upper)
        }
        Rule::Equals { left, right } => {
            let (l, r) = pair(left, right, ctx, back)?;
            Ok((l - r).abs() < EPSILON)
        }
        Rule::And(rules) => {
            for r in rules {
                if !evaluate(r, ctx, back)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Rule::Or(rules) => {
            for r in rules {
                if evaluate(r, ctx, back)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Rule::Not(rule) => Ok(!evaluate(rule, ctx, back)?),
        Rule::Consecutive { rule, count } => {
            if ctx.tick_back(back + count.saturating_sub(1)).is_none() {
                return Ok(false);
            }
            for k in 0..*count {
                if !evaluate(rule, ctx, back + k)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Rule::AnyOf { rule, count } => {
            for k in 0..*count {
                if ctx.tick_back(back + k).is_none() {
                    break;
                }
                if evaluate(rule, ctx, back + k)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

fn pair(
    left: &Operand,
    right: &Operand,
    ctx: &RuleContext<'_>,
    back: usize,
) -> Result<(f64, f64), StrategyError> {
    Ok((
        resolve_operand(left, ctx, back)?,
        resolve_operand(right, ctx, back)?,
    ))
}

fn resolve_operand(
    operand: &Operand,
    ctx: &RuleContext<'_>,
    back: usize,
) -> Result<f64, StrategyError> {
    if let Operand::Constant(v) = operand {
        return Ok(*v);
    }
    let Some(tick) = ctx.tick_back(back) else {
        return Ok(f64::NAN);
    };
    let value = match operand {
        Operand::Price => tick.price,
        Operand::Open => tick.open,
        Operand::High => tick.high,
        Operand::Low => tick.low,
        Operand::ChangePct => tick.change_pct,
        Operand::Turnover => tick.turnover,
        Operand::Strength => tick.strength,
        Operand::BuyVolume => tick.buy_volume,
        Operand::SellVolume => tick.sell_volume,
        Operand::MovingAverage(i) => match tick.moving_averages.get(*i) {
            Some(v) => *v,
            None => {
                return Err(StrategyError::new(format!(
                    "moving average column {} not present (tick has {})",
                    i,
                    tick.moving_averages.len()
                )));
            }
        },
        Operand::Ask(level) => ladder_price(&tick.asks, *level),
        Operand::Bid(level) => ladder_price(&tick.bids, *level),
        Operand::Indicator(ind) => {
            let index = ctx.index() - back;
            match *ind {
                IndicatorRef::AvgPrice(n) => ctx.tape.avg_price(n, index),
                IndicatorRef::AvgStrength(n) => ctx.tape.avg_strength(n, index),
                IndicatorRef::Angle(n) => ctx.tape.angle(n, index),
            }
        }
        Operand::ReturnPct => position(ctx, "return_pct")?.return_pct,
        Operand::HoldSecs => position(ctx, "hold_secs")?.hold_secs as f64,
        Operand::Constant(v) => *v,
    };
    Ok(value)
}

fn ladder_price(levels: &[OrderBookLevel], level: usize) -> f64 {
    level
        .checked_sub(1)
        .and_then(|i| levels.get(i))
        .filter(|l| !l.is_empty())
        .map(|l| l.price)
        .unwrap_or(f64::NAN)
}

fn position(ctx: &RuleContext<'_>, field: &str) -> Result<PositionView, StrategyError> {
    ctx.position
        .ok_or_else(|| StrategyError::new(format!("{} used without an open position", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::IndicatorTape;
    use crate::domain::rule_parser::parse;
    use crate::domain::tick::{TickSnapshot, BOOK_LEVELS};
    use chrono::NaiveDate;

    fn make_tick(i: usize, price: f64) -> TickSnapshot {
        let mut asks = [OrderBookLevel::default(); BOOK_LEVELS];
        let mut bids = [OrderBookLevel::default(); BOOK_LEVELS];
        asks[0] = OrderBookLevel::new(price + 1.0, 10.0);
        bids[0] = OrderBookLevel::new(price - 1.0, 10.0);
        TickSnapshot {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(9, 0, i as u32)
                .unwrap(),
            price,
            open: price,
            high: price,
            low: price,
            change_pct: 0.0,
            turnover: 0.0,
            strength: 100.0 + i as f64,
            buy_volume: 10.0,
            sell_volume: 5.0,
            moving_averages: vec![100.0],
            asks,
            bids,
            in_watchlist: true,
        }
    }

    struct Fixture {
        ticks: Vec<TickSnapshot>,
        tape: IndicatorTape,
    }

    impl Fixture {
        fn new(prices: &[f64]) -> Self {
            let ticks: Vec<TickSnapshot> = prices
                .iter()
                .enumerate()
                .map(|(i, &p)| make_tick(i, p))
                .collect();
            let mut tape = IndicatorTape::new();
            for t in &ticks {
                tape.push(t);
            }
            Self { ticks, tape }
        }

        fn ctx(&self, index: usize) -> RuleContext<'_> {
            RuleContext::new(&self.ticks, index, 50, &self.tape)
        }

        fn eval(&self, rule: &str, index: usize) -> Result<bool, StrategyError> {
            let rule = parse(rule).unwrap();
            rule.evaluate(&self.ctx(index))
        }
    }

    #[test]
    fn comparisons_on_tick_fields() {
        let f = Fixture::new(&[105.0]);
        assert!(f.eval("ABOVE(price, 100)", 0).unwrap());
        assert!(!f.eval("BELOW(price, 100)", 0).unwrap());
        assert!(f.eval("BETWEEN(price, 100, 105)", 0).unwrap());
        assert!(f.eval("EQUALS(ASK(1), 106)", 0).unwrap());
        assert!(f.eval("ABOVE(buy_volume, sell_volume)", 0).unwrap());
    }

    #[test]
    fn empty_ladder_level_is_false() {
        let f = Fixture::new(&[105.0]);
        assert!(!f.eval("ABOVE(ASK(2), 0)", 0).unwrap());
        assert!(!f.eval("BELOW(ASK(2), 1000000)", 0).unwrap());
    }

    #[test]
    fn cross_needs_previous_tick() {
        let f = Fixture::new(&[99.0, 101.0]);
        assert!(!f.eval("CROSS_ABOVE(price, MA(0))", 0).unwrap());
        assert!(f.eval("CROSS_ABOVE(price, MA(0))", 1).unwrap());
        assert!(!f.eval("CROSS_BELOW(price, MA(0))", 1).unwrap());
    }

    #[test]
    fn cross_respects_lookback_window() {
        let f = Fixture::new(&[99.0, 101.0]);
        let ctx = RuleContext::new(&f.ticks, 1, 1, &f.tape);
        let rule = parse("CROSS_ABOVE(price, MA(0))").unwrap();
        assert!(!rule.evaluate(&ctx).unwrap());
    }

    #[test]
    fn rolling_indicators_read_the_tape() {
        let f = Fixture::new(&[100.0, 102.0, 104.0]);
        assert!(f.eval("EQUALS(AVG_PRICE(3), 102)", 2).unwrap());
        assert!(f.eval("EQUALS(AVG_STRENGTH(2), 101.5)", 2).unwrap());
        assert!(f.eval("ABOVE(ANGLE(1), 0)", 2).unwrap());
        assert!(!f.eval("ABOVE(AVG_PRICE(5), 0)", 2).unwrap());
    }

    #[test]
    fn composites_short_circuit() {
        let f = Fixture::new(&[105.0]);
        // second child would error, but AND stops at the first false
        assert!(!f.eval("AND(BELOW(price, 1), ABOVE(MA(7), 1))", 0).unwrap());
        assert!(f.eval("OR(ABOVE(price, 1), ABOVE(MA(7), 1))", 0).unwrap());
        assert!(f.eval("NOT(BELOW(price, 1))", 0).unwrap());
    }

    #[test]
    fn consecutive_and_any_of() {
        let f = Fixture::new(&[101.0, 102.0, 99.0, 103.0, 104.0]);
        assert!(f.eval("CONSECUTIVE(ABOVE(price, 100), 2)", 4).unwrap());
        assert!(!f.eval("CONSECUTIVE(ABOVE(price, 100), 3)", 4).unwrap());
        assert!(!f.eval("CONSECUTIVE(ABOVE(price, 100), 3)", 1).unwrap());
        assert!(f.eval("ANY_OF(BELOW(price, 100), 3)", 4).unwrap());
        assert!(!f.eval("ANY_OF(BELOW(price, 100), 2)", 4).unwrap());
    }

    #[test]
    fn missing_moving_average_is_an_error() {
        let f = Fixture::new(&[105.0]);
        let err = f.eval("ABOVE(MA(3), 1)", 0).unwrap_err();
        assert!(err.message.contains("moving average column 3"));
    }

    #[test]
    fn position_fields_need_a_position() {
        let f = Fixture::new(&[105.0]);
        assert!(f.eval("ABOVE(return_pct, 1)", 0).is_err());

        let view = PositionView {
            buy_price: 100.0,
            held_qty: 10.0,
            return_pct: 5.0,
            max_return: 5.0,
            min_return: 0.0,
            hold_secs: 30,
        };
        let rule = parse("AND(ABOVE(return_pct, 1), BELOW(hold_secs, 60))").unwrap();
        assert!(rule.evaluate(&f.ctx(0).with_position(view)).unwrap());
    }
}
