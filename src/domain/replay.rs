//! Replay-wide settings shared by every variant of a run.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::NaiveTime;

use super::market::Market;
use super::tick::BOOK_LEVELS;

pub const DEFAULT_PROGRESS_INTERVAL: usize = 100;
pub const DEFAULT_LOOKBACK_TICKS: usize = 600;

/// Half-open intraday window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t < self.end
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    /// Parses `HH:MM:SS-HH:MM:SS`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("time window '{}' must look like HH:MM:SS-HH:MM:SS", s))?;
        let start = parse_time(a)?;
        let end = parse_time(b)?;
        if end <= start {
            return Err(format!("time window '{}' ends before it starts", s));
        }
        Ok(TimeWindow { start, end })
    }
}

pub fn parse_time(s: &str) -> Result<NaiveTime, String> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("invalid time '{}'", s))
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub market: Market,
    pub blacklist: HashSet<String>,
    /// No new entries inside any of these windows.
    pub forbidden_windows: Vec<TimeWindow>,
    /// No new entries below this price. 0 disables.
    pub price_floor: f64,
    /// From this time on, no new entries and every holding is liquidated.
    pub day_end_time: Option<NaiveTime>,
    /// Ladder levels visible to market fills (1..=5).
    pub book_depth: usize,
    pub progress_interval: usize,
    /// Ticks of history handed to predicates.
    pub lookback_ticks: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            market: Market::Equity,
            blacklist: HashSet::new(),
            forbidden_windows: Vec::new(),
            price_floor: 0.0,
            day_end_time: None,
            book_depth: BOOK_LEVELS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            lookback_ticks: DEFAULT_LOOKBACK_TICKS,
        }
    }
}

impl ReplayConfig {
    pub fn is_blacklisted(&self, instrument: &str) -> bool {
        self.blacklist.contains(instrument)
    }

    pub fn in_forbidden_window(&self, t: NaiveTime) -> bool {
        self.forbidden_windows.iter().any(|w| w.contains(t))
    }

    pub fn past_day_end(&self, t: NaiveTime) -> bool {
        self.day_end_time.is_some_and(|end| t >= end)
    }

    pub fn effective_depth(&self) -> usize {
        self.book_depth.clamp(1, BOOK_LEVELS)
    }
}
