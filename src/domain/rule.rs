//! Rule AST for the built-in rule language.
//!
//! - `Operand`: what can be compared (tick fields, ladder prices, rolling
//!   indicators, position fields, constants)
//! - `IndicatorRef`: a rolling indicator computed on the replay tape
//! - `Rule`: comparison, composite, and temporal rules

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Price,
    Open,
    High,
    Low,
    ChangePct,
    Turnover,
    Strength,
    BuyVolume,
    SellVolume,
    /// Precomputed moving-average column carried by the tick.
    MovingAverage(usize),
    /// Ask ladder price, 1-based level.
    Ask(usize),
    /// Bid ladder price, 1-based level.
    Bid(usize),
    Indicator(IndicatorRef),
    /// Current return of the open position, percent. Exit rules only.
    ReturnPct,
    /// Seconds since the first buy fill. Exit rules only.
    HoldSecs,
    Constant(f64),
}

impl Operand {
    pub fn is_position_field(&self) -> bool {
        matches!(self, Operand::ReturnPct | Operand::HoldSecs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorRef {
    AvgPrice(usize),
    AvgStrength(usize),
    Angle(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    CrossAbove {
        left: Operand,
        right: Operand,
    },
    CrossBelow {
        left: Operand,
        right: Operand,
    },
    Above {
        left: Operand,
        right: Operand,
    },
    Below {
        left: Operand,
        right: Operand,
    },
    Between {
        operand: Operand,
        lower: f64,
        upper: f64,
    },
    Equals {
        left: Operand,
        right: Operand,
    },
    And(Vec<Rule>),
    Or(Vec<Rule>),
    Not(Box<Rule>),
    Consecutive {
        rule: Box<Rule>,
        count: usize,
    },
    AnyOf {
        rule: Box<Rule>,
        count: usize,
    },
}

impl Rule {
    fn operands(&self, out: &mut Vec<Operand>) {
        match self {
            Rule::CrossAbove { left, right }
            | Rule::CrossBelow { left, right }
            | Rule::Above { left, right }
            | Rule::Below { left, right }
            | Rule::Equals { left, right } => {
                out.push(left.clone());
                out.push(right.clone());
            }
            Rule::Between { operand, .. } => out.push(operand.clone()),
            Rule::And(rules) | Rule::Or(rules) => {
                for r in rules {
                    r.operands(out);
                }
            }
            Rule::Not(rule) | Rule::Consecutive { rule, .. } | Rule::AnyOf { rule, .. } => {
                rule.operands(out)
            }
        }
    }

    /// True when any operand reads the open position.
    pub fn uses_position(&self) -> bool {
        let mut ops = Vec::new();
        self.operands(&mut ops);
        ops.iter().any(Operand::is_position_field)
    }

    /// Ticks of history the rule reaches back, including the current one.
    pub fn lookback(&self) -> usize {
        match self {
            Rule::CrossAbove { .. } | Rule::CrossBelow { .. } => 2,
            Rule::Above { .. } | Rule::Below { .. } | Rule::Between { .. } | Rule::Equals { .. } => 1,
            Rule::And(rules) | Rule::Or(rules) => {
                rules.iter().map(Rule::lookback).max().unwrap_or(1)
            }
            Rule::Not(rule) => rule.lookback(),
            Rule::Consecutive { rule, count } | Rule::AnyOf { rule, count } => {
                rule.lookback() + count.saturating_sub(1)
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Price => write!(f, "price"),
            Operand::Open => write!(f, "open"),
            Operand::High => write!(f, "high"),
            Operand::Low => write!(f, "low"),
            Operand::ChangePct => write!(f, "change_pct"),
            Operand::Turnover => write!(f, "turnover"),
            Operand::Strength => write!(f, "strength"),
            Operand::BuyVolume => write!(f, "buy_volume"),
            Operand::SellVolume => write!(f, "sell_volume"),
            Operand::MovingAverage(i) => write!(f, "MA({})", i),
            Operand::Ask(level) => write!(f, "ASK({})", level),
            Operand::Bid(level) => write!(f, "BID({})", level),
            Operand::Indicator(ind) => write!(f, "{}", ind),
            Operand::ReturnPct => write!(f, "return_pct"),
            Operand::HoldSecs => write!(f, "hold_secs"),
            Operand::Constant(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for IndicatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorRef::AvgPrice(n) => write!(f, "AVG_PRICE({})", n),
            IndicatorRef::AvgStrength(n) => write!(f, "AVG_STRENGTH({})", n),
            IndicatorRef::Angle(n) => write!(f, "ANGLE({})", n),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, keyword: &str, rules: &[Rule]) -> fmt::Result {
    write!(f, "{}(", keyword)?;
    for (i, r) in rules.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", r)?;
    }
    write!(f, ")")
}

/// Renders the rule back into the expression language.
impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::CrossAbove { left, right } => write!(f, "CROSS_ABOVE({}, {})", left, right),
            Rule::CrossBelow { left, right } => write!(f, "CROSS_BELOW({}, {})", left, right),
            Rule::Above { left, right } => write!(f, "ABOVE({}, {})", left, right),
            Rule::Below { left, right } => write!(f, "BELOW({}, {})", left, right),
            Rule::Equals { left, right } => write!(f, "EQUALS({}, {})", left, right),
            Rule::Between {
                operand,
                lower,
                upper,
            } => write!(f, "BETWEEN({}, {}, {})", operand, lower, upper),
            Rule::And(rules) => write_list(f, "AND", rules),
            Rule::Or(rules) => write_list(f, "OR", rules),
            Rule::Not(rule) => write!(f, "NOT({})", rule),
            Rule::Consecutive { rule, count } => write!(f, "CONSECUTIVE({}, {})", rule, count),
            Rule::AnyOf { rule, count } => write!(f, "ANY_OF({}, {})", rule, count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_operands_detected_through_nesting() {
        let rule = Rule::Or(vec![
            Rule::Above {
                left: Operand::Price,
                right: Operand::Constant(100.0),
            },
            Rule::Not(Box::new(Rule::Below {
                left: Operand::ReturnPct,
                right: Operand::Constant(2.0),
            })),
        ]);
        assert!(rule.uses_position());

        let plain = Rule::Between {
            operand: Operand::Strength,
            lower: 100.0,
            upper: 200.0,
        };
        assert!(!plain.uses_position());
    }

    #[test]
    fn lookback_accounts_for_temporal_rules() {
        let cross = Rule::CrossAbove {
            left: Operand::Price,
            right: Operand::Indicator(IndicatorRef::AvgPrice(20)),
        };
        assert_eq!(cross.lookback(), 2);
        let consecutive = Rule::Consecutive {
            rule: Box::new(cross.clone()),
            count: 3,
        };
        assert_eq!(consecutive.lookback(), 4);
        assert_eq!(Rule::And(vec![cross, consecutive]).lookback(), 4);
    }

    #[test]
    fn display_renders_parseable_source() {
        let src = "AND(CROSS_ABOVE(price, AVG_PRICE(20)), NOT(BELOW(ASK(1), 1.5)), CONSECUTIVE(BETWEEN(strength, 100, 150), 3))";
        let rule = crate::domain::rule_parser::parse(src).unwrap();
        assert_eq!(rule.to_string(), src);
        assert_eq!(crate::domain::rule_parser::parse(&rule.to_string()).unwrap(), rule);
    }
}
