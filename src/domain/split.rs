//! Split-order schedule.
//!
//! An entry or exit may be divided into `total` tranches. The share of the
//! whole taken by tranche `index` depends on the split method. The final
//! tranche of an exit never uses the table: it sells whatever is left.

use std::fmt;
use std::str::FromStr;

use super::market::Market;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMethod {
    /// Same share per tranche.
    #[default]
    Equal,
    /// Larger tranches first.
    FrontLoaded,
    /// Larger tranches last.
    BackLoaded,
}

impl SplitMethod {
    pub fn code(self) -> u8 {
        match self {
            SplitMethod::Equal => 0,
            SplitMethod::FrontLoaded => 1,
            SplitMethod::BackLoaded => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SplitMethod::Equal),
            1 => Some(SplitMethod::FrontLoaded),
            2 => Some(SplitMethod::BackLoaded),
            _ => None,
        }
    }
}

impl fmt::Display for SplitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitMethod::Equal => write!(f, "equal"),
            SplitMethod::FrontLoaded => write!(f, "front"),
            SplitMethod::BackLoaded => write!(f, "back"),
        }
    }
}

impl FromStr for SplitMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equal" | "0" => Ok(SplitMethod::Equal),
            "front" | "front_loaded" | "1" => Ok(SplitMethod::FrontLoaded),
            "back" | "back_loaded" | "2" => Ok(SplitMethod::BackLoaded),
            other => Err(format!("unknown split method '{}'", other)),
        }
    }
}

/// Share of the whole quantity taken by tranche `index` of `total`.
///
/// Returns 0.0 for an index outside the schedule.
pub fn split_fraction(method: SplitMethod, total: u32, index: u32) -> f64 {
    if total == 0 || index >= total {
        return 0.0;
    }
    if total == 1 {
        return 1.0;
    }
    // weights 1..=total; sum = total * (total + 1) / 2
    let weight_sum = (total * (total + 1) / 2) as f64;
    match method {
        SplitMethod::Equal => 1.0 / total as f64,
        SplitMethod::FrontLoaded => (total - index) as f64 / weight_sum,
        SplitMethod::BackLoaded => (index + 1) as f64 / weight_sum,
    }
}

/// Quantity to sell for exit tranche `index`.
///
/// `base_qty` is the position size the schedule was laid out against,
/// `held_qty` what is still held. The last tranche returns `held_qty` exactly.
pub fn split_sell_quantity(
    market: Market,
    method: SplitMethod,
    total: u32,
    index: u32,
    base_qty: f64,
    held_qty: f64,
) -> f64 {
    if total <= 1 || index + 1 >= total {
        return held_qty;
    }
    market
        .floor_quantity(base_qty * split_fraction(method, total, index))
        .min(held_qty)
}
