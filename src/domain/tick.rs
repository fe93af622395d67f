//! Tick snapshot representation.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Depth of the order-book ladder carried by every tick.
pub const BOOK_LEVELS: usize = 5;

/// One (price, quantity) rung of an order-book ladder.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrderBookLevel {
    pub price: f64,
    pub quantity: f64,
}

impl OrderBookLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }

    pub fn is_empty(&self) -> bool {
        self.price <= 0.0 || self.quantity <= 0.0
    }
}

/// One immutable market observation.
///
/// `asks[0]` is the best (lowest) ask, `bids[0]` the best (highest) bid.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSnapshot {
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub change_pct: f64,
    pub turnover: f64,
    pub strength: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub moving_averages: Vec<f64>,
    pub asks: [OrderBookLevel; BOOK_LEVELS],
    pub bids: [OrderBookLevel; BOOK_LEVELS],
    pub in_watchlist: bool,
}

impl TickSnapshot {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.timestamp.time()
    }

    /// Precomputed moving average by column index; NaN when absent.
    pub fn moving_average(&self, index: usize) -> f64 {
        self.moving_averages.get(index).copied().unwrap_or(f64::NAN)
    }

    pub fn best_ask(&self) -> Option<OrderBookLevel> {
        self.asks.iter().copied().find(|l| !l.is_empty())
    }

    pub fn best_bid(&self) -> Option<OrderBookLevel> {
        self.bids.iter().copied().find(|l| !l.is_empty())
    }
}

/// Index of the first tick of each trading day, plus the slice end.
///
/// `ticks` must be ordered by timestamp.
pub fn day_boundaries(ticks: &[TickSnapshot]) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut current: Option<NaiveDate> = None;
    for (i, tick) in ticks.iter().enumerate() {
        let date = tick.date();
        if current != Some(date) {
            starts.push(i);
            current = Some(date);
        }
    }
    starts.push(ticks.len());
    starts
}

/// Sub-slice of `ticks` whose dates fall in `[start, end]`.
pub fn slice_by_date(ticks: &[TickSnapshot], start: NaiveDate, end: NaiveDate) -> &[TickSnapshot] {
    let lo = ticks.partition_point(|t| t.date() < start);
    let hi = ticks.partition_point(|t| t.date() <= end);
    if lo >= hi { &ticks[0..0] } else { &ticks[lo..hi] }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick_at(ts: &str, price: f64) -> TickSnapshot {
        TickSnapshot {
            timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").unwrap(),
            price,
            open: price,
            high: price,
            low: price,
            change_pct: 0.0,
            turnover: 0.0,
            strength: 100.0,
            buy_volume: 0.0,
            sell_volume: 0.0,
            moving_averages: vec![price - 1.0],
            asks: [OrderBookLevel::new(price + 1.0, 10.0); BOOK_LEVELS],
            bids: [OrderBookLevel::default(); BOOK_LEVELS],
            in_watchlist: true,
        }
    }

    #[test]
    fn best_levels_skip_empty_rungs() {
        let mut tick = tick_at("2024-01-02 09:00:00", 100.0);
        tick.bids[1] = OrderBookLevel::new(99.0, 5.0);
        assert_eq!(tick.best_bid(), Some(OrderBookLevel::new(99.0, 5.0)));
        assert_eq!(tick.best_ask(), Some(OrderBookLevel::new(101.0, 10.0)));
    }

    #[test]
    fn moving_average_missing_column_is_nan() {
        let tick = tick_at("2024-01-02 09:00:00", 100.0);
        assert_eq!(tick.moving_average(0), 99.0);
        assert!(tick.moving_average(3).is_nan());
    }

    #[test]
    fn day_boundaries_split_on_date_change() {
        let ticks = vec![
            tick_at("2024-01-02 09:00:00", 100.0),
            tick_at("2024-01-02 15:00:00", 101.0),
            tick_at("2024-01-03 09:00:00", 102.0),
        ];
        assert_eq!(day_boundaries(&ticks), vec![0, 2, 3]);
        assert_eq!(day_boundaries(&[]), vec![0]);
    }

    #[test]
    fn slice_by_date_is_inclusive() {
        let ticks = vec![
            tick_at("2024-01-02 09:00:00", 100.0),
            tick_at("2024-01-03 09:00:00", 101.0),
            tick_at("2024-01-04 09:00:00", 102.0),
        ];
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        assert_eq!(slice_by_date(&ticks, d(3), d(4)).len(), 2);
        assert_eq!(slice_by_date(&ticks, d(5), d(9)).len(), 0);
        assert_eq!(slice_by_date(&ticks, d(4), d(2)).len(), 0);
    }
}
