//! Per-variant trading parameters.
//!
//! One `VariantParams` is one point of a parameter sweep after its axis values
//! have been applied to the configured base parameters.

use std::fmt;
use std::str::FromStr;

use super::split::SplitMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "market" | "0" => Ok(OrderType::Market),
            "limit" | "1" => Ok(OrderType::Limit),
            other => Err(format!("unknown order type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantParams {
    pub buy_order: OrderType,
    pub sell_order: OrderType,
    /// Cash committed to a full entry (all buy tranches together).
    pub buy_amount: f64,
    /// Limit buy price offset from the current price, in tick units.
    pub buy_offset_ticks: i32,
    /// Limit sell price offset from the current price, in tick units.
    pub sell_offset_ticks: i32,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Give-back from the running max return that triggers an exit. 0 disables.
    pub trailing_stop_pct: f64,
    pub split_buy_count: u32,
    pub split_buy_method: SplitMethod,
    /// Additional tranche n fires once return falls to -gap * n.
    pub split_buy_gap_pct: f64,
    pub split_sell_count: u32,
    pub split_sell_method: SplitMethod,
    /// Exit tranche n (0-based) fires once return reaches step * (n + 1).
    pub split_sell_step_pct: f64,
    pub reprice_step_ticks: u32,
    pub max_reprices: u32,
    /// Divergence, in tick units, past which an exhausted buy order is cancelled.
    pub cancel_ticks: u32,
    pub order_timeout_secs: i64,
    pub stop_loss_cooldown_secs: i64,
    pub reentry_interval_secs: i64,
    /// 0 means unlimited.
    pub max_trades_per_day: u32,
    /// 0 means unlimited.
    pub max_stop_losses_per_day: u32,
}

impl Default for VariantParams {
    fn default() -> Self {
        VariantParams {
            buy_order: OrderType::Market,
            sell_order: OrderType::Market,
            buy_amount: 1_000_000.0,
            buy_offset_ticks: 0,
            sell_offset_ticks: 0,
            take_profit_pct: 0.0,
            stop_loss_pct: 0.0,
            trailing_stop_pct: 0.0,
            split_buy_count: 1,
            split_buy_method: SplitMethod::Equal,
            split_buy_gap_pct: 0.0,
            split_sell_count: 1,
            split_sell_method: SplitMethod::Equal,
            split_sell_step_pct: 0.0,
            reprice_step_ticks: 1,
            max_reprices: 3,
            cancel_ticks: 5,
            order_timeout_secs: 60,
            stop_loss_cooldown_secs: 0,
            reentry_interval_secs: 0,
            max_trades_per_day: 0,
            max_stop_losses_per_day: 0,
        }
    }
}

/// Names accepted by [`VariantParams::set`], in config-key form.
pub const PARAM_NAMES: &[&str] = &[
    "buy_order",
    "sell_order",
    "buy_amount",
    "buy_offset_ticks",
    "sell_offset_ticks",
    "take_profit",
    "stop_loss",
    "trailing_stop",
    "split_buy_count",
    "split_buy_method",
    "split_buy_gap",
    "split_sell_count",
    "split_sell_method",
    "split_sell_step",
    "reprice_step_ticks",
    "max_reprices",
    "cancel_ticks",
    "order_timeout_secs",
    "stop_loss_cooldown_secs",
    "reentry_interval_secs",
    "max_trades_per_day",
    "max_stop_losses_per_day",
];

impl VariantParams {
    /// Set one parameter by config name from a numeric sweep value.
    ///
    /// Enum parameters take their numeric code (market=0/limit=1,
    /// equal=0/front=1/back=2).
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), String> {
        if !value.is_finite() {
            return Err(format!("{} must be finite", name));
        }
        let as_u32 = || value.max(0.0).round() as u32;
        let as_i64 = || value.round() as i64;
        match name {
            "buy_order" => self.buy_order = order_type_code(value)?,
            "sell_order" => self.sell_order = order_type_code(value)?,
            "buy_amount" => self.buy_amount = value,
            "buy_offset_ticks" => self.buy_offset_ticks = value.round() as i32,
            "sell_offset_ticks" => self.sell_offset_ticks = value.round() as i32,
            "take_profit" => self.take_profit_pct = value,
            "stop_loss" => self.stop_loss_pct = value,
            "trailing_stop" => self.trailing_stop_pct = value,
            "split_buy_count" => self.split_buy_count = as_u32().max(1),
            "split_buy_method" => self.split_buy_method = split_method_code(value)?,
            "split_buy_gap" => self.split_buy_gap_pct = value,
            "split_sell_count" => self.split_sell_count = as_u32().max(1),
            "split_sell_method" => self.split_sell_method = split_method_code(value)?,
            "split_sell_step" => self.split_sell_step_pct = value,
            "reprice_step_ticks" => self.reprice_step_ticks = as_u32(),
            "max_reprices" => self.max_reprices = as_u32(),
            "cancel_ticks" => self.cancel_ticks = as_u32(),
            "order_timeout_secs" => self.order_timeout_secs = as_i64(),
            "stop_loss_cooldown_secs" => self.stop_loss_cooldown_secs = as_i64(),
            "reentry_interval_secs" => self.reentry_interval_secs = as_i64(),
            "max_trades_per_day" => self.max_trades_per_day = as_u32(),
            "max_stop_losses_per_day" => self.max_stop_losses_per_day = as_u32(),
            other => return Err(format!("unknown parameter '{}'", other)),
        }
        Ok(())
    }

    pub fn is_known(name: &str) -> bool {
        PARAM_NAMES.contains(&name)
    }
}

fn order_type_code(value: f64) -> Result<OrderType, String> {
    match value.round() as i64 {
        0 => Ok(OrderType::Market),
        1 => Ok(OrderType::Limit),
        other => Err(format!("invalid order type code {}", other)),
    }
}

fn split_method_code(value: f64) -> Result<SplitMethod, String> {
    let code = value.round();
    if !(0.0..=255.0).contains(&code) {
        return Err(format!("invalid split method code {}", code));
    }
    SplitMethod::from_code(code as u8).ok_or_else(|| format!("invalid split method code {}", code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_single_tranche_market_orders() {
        let p = VariantParams::default();
        assert_eq!(p.buy_order, OrderType::Market);
        assert_eq!(p.split_buy_count, 1);
        assert_eq!(p.split_sell_count, 1);
        assert_eq!(p.max_trades_per_day, 0);
    }

    #[test]
    fn set_numeric_and_enum_parameters() {
        let mut p = VariantParams::default();
        p.set("take_profit", 2.5).unwrap();
        p.set("sell_order", 1.0).unwrap();
        p.set("split_sell_method", 1.0).unwrap();
        p.set("split_sell_count", 0.0).unwrap();
        assert_eq!(p.take_profit_pct, 2.5);
        assert_eq!(p.sell_order, OrderType::Limit);
        assert_eq!(p.split_sell_method, SplitMethod::FrontLoaded);
        assert_eq!(p.split_sell_count, 1);
    }

    #[test]
    fn set_rejects_unknown_and_bad_codes() {
        let mut p = VariantParams::default();
        assert!(p.set("leverage", 2.0).is_err());
        assert!(p.set("buy_order", 3.0).is_err());
        assert!(p.set("split_buy_method", -1.0).is_err());
        assert!(p.set("stop_loss", f64::NAN).is_err());
    }

    #[test]
    fn every_listed_name_is_settable() {
        for name in PARAM_NAMES {
            let mut p = VariantParams::default();
            assert!(p.set(name, 1.0).is_ok(), "{} should be settable", name);
            assert!(VariantParams::is_known(name));
        }
    }

    #[test]
    fn order_type_parses_names() {
        assert_eq!("LIMIT".parse::<OrderType>(), Ok(OrderType::Limit));
        assert!("stop".parse::<OrderType>().is_err());
    }
}
