//! Rolling indicators built tick by tick during a replay.
//!
//! The tape keeps prefix sums so any trailing average over the ticks seen so
//! far is O(1). It is shared by every variant group of a run; predicates read
//! it through [`RuleContext`](super::strategy::RuleContext).

use super::tick::TickSnapshot;

#[derive(Debug, Clone)]
pub struct IndicatorTape {
    price_sum: Vec<f64>,
    strength_sum: Vec<f64>,
}

impl Default for IndicatorTape {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorTape {
    pub fn new() -> Self {
        Self {
            price_sum: vec![0.0],
            strength_sum: vec![0.0],
        }
    }

    pub fn with_capacity(ticks: usize) -> Self {
        let mut price_sum = Vec::with_capacity(ticks + 1);
        let mut strength_sum = Vec::with_capacity(ticks + 1);
        price_sum.push(0.0);
        strength_sum.push(0.0);
        Self {
            price_sum,
            strength_sum,
        }
    }

    pub fn push(&mut self, tick: &TickSnapshot) {
        let p = self.price_sum.last().copied().unwrap_or(0.0);
        let s = self.strength_sum.last().copied().unwrap_or(0.0);
        self.price_sum.push(p + tick.price);
        self.strength_sum.push(s + tick.strength);
    }

    /// Number of ticks pushed so far.
    pub fn len(&self) -> usize {
        self.price_sum.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean price of the `period` ticks ending at `index`; NaN while warming up.
    pub fn avg_price(&self, period: usize, index: usize) -> f64 {
        trailing_mean(&self.price_sum, period, index)
    }

    /// Mean execution strength of the `period` ticks ending at `index`.
    pub fn avg_strength(&self, period: usize, index: usize) -> f64 {
        trailing_mean(&self.strength_sum, period, index)
    }

    /// Inclination of the `period` average price at `index`, in degrees.
    ///
    /// The slope is the one-tick percent change of the average.
    pub fn angle(&self, period: usize, index: usize) -> f64 {
        if index == 0 {
            return f64::NAN;
        }
        let now = self.avg_price(period, index);
        let prev = self.avg_price(period, index - 1);
        if now.is_nan() || prev.is_nan() || prev == 0.0 {
            return f64::NAN;
        }
        ((now - prev) / prev * 100.0).atan().to_degrees()
    }
}

fn trailing_mean(prefix: &[f64], period: usize, index: usize) -> f64 {
    if period == 0 || index + 1 >= prefix.len() || index + 1 < period {
        return f64::NAN;
    }
    (prefix[index + 1] - prefix[index + 1 - period]) / period as f64
}
