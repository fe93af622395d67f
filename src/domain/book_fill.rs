//! Order-book fill simulation.
//!
//! Market orders walk the ladder from best to worst price. A fill is
//! all-or-nothing across the configured depth: if the ladder cannot absorb
//! the whole quantity the order is unfilled this tick and the caller retries
//! on a later tick under its usual reprice/cancel limits.

use super::tick::OrderBookLevel;

/// A completed market fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookFill {
    /// Quantity-weighted average price over the consumed levels.
    pub price: f64,
    pub quantity: f64,
    /// Price of the last (worst) level touched.
    pub worst_price: f64,
    pub levels_consumed: usize,
}

/// Sum of `price * quantity` divided by total quantity; 0.0 when nothing was filled.
pub fn weighted_average(fills: &[(f64, f64)]) -> f64 {
    let total_qty: f64 = fills.iter().map(|(_, q)| q).sum();
    if total_qty <= 0.0 {
        return 0.0;
    }
    let notional: f64 = fills.iter().map(|(p, q)| p * q).sum();
    notional / total_qty
}

/// Total quantity available over the first `depth` non-empty levels.
pub fn available_depth(levels: &[OrderBookLevel], depth: usize) -> f64 {
    levels
        .iter()
        .take(depth)
        .filter(|l| !l.is_empty())
        .map(|l| l.quantity)
        .sum()
}

/// Match `quantity` against `levels` (best first), looking at most `depth` levels.
///
/// Returns `None` when `quantity` is not positive or the ladder is too thin.
pub fn simulate_market_fill(
    levels: &[OrderBookLevel],
    quantity: f64,
    depth: usize,
) -> Option<BookFill> {
    if quantity <= 0.0 {
        return None;
    }
    if available_depth(levels, depth) < quantity {
        return None;
    }

    let mut remaining = quantity;
    let mut consumed: Vec<(f64, f64)> = Vec::with_capacity(depth);
    for level in levels.iter().take(depth).filter(|l| !l.is_empty()) {
        let take = remaining.min(level.quantity);
        consumed.push((level.price, take));
        remaining -= take;
        if remaining <= 0.0 {
            break;
        }
    }

    let worst_price = consumed.last().map(|(p, _)| *p).unwrap_or(0.0);
    Some(BookFill {
        price: weighted_average(&consumed),
        quantity,
        worst_price,
        levels_consumed: consumed.len(),
    })
}
