//! CSV tick data adapter.
//!
//! One file per instrument, `<data_dir>/<instrument>.csv`, with a header row.
//! Ladder columns are `ask1_price, ask1_qty .. ask5_price, ask5_qty` and the
//! same for bids; absent ladder columns are empty levels. Moving averages go
//! in one `ma` column as space-separated values.

use crate::domain::error::TickSweepError;
use crate::domain::replay::TimeWindow;
use crate::domain::tick::{OrderBookLevel, TickSnapshot, BOOK_LEVELS};
use crate::ports::data_port::DataPort;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Deserialize)]
struct TickRow {
    timestamp: String,
    price: f64,
    #[serde(default)]
    open: Option<f64>,
    #[serde(default)]
    high: Option<f64>,
    #[serde(default)]
    low: Option<f64>,
    #[serde(default)]
    change_pct: Option<f64>,
    #[serde(default)]
    turnover: Option<f64>,
    #[serde(default)]
    strength: Option<f64>,
    #[serde(default)]
    buy_volume: Option<f64>,
    #[serde(default)]
    sell_volume: Option<f64>,
    #[serde(default)]
    ma: String,
    #[serde(default)]
    ask1_price: Option<f64>,
    #[serde(default)]
    ask1_qty: Option<f64>,
    #[serde(default)]
    ask2_price: Option<f64>,
    #[serde(default)]
    ask2_qty: Option<f64>,
    #[serde(default)]
    ask3_price: Option<f64>,
    #[serde(default)]
    ask3_qty: Option<f64>,
    #[serde(default)]
    ask4_price: Option<f64>,
    #[serde(default)]
    ask4_qty: Option<f64>,
    #[serde(default)]
    ask5_price: Option<f64>,
    #[serde(default)]
    ask5_qty: Option<f64>,
    #[serde(default)]
    bid1_price: Option<f64>,
    #[serde(default)]
    bid1_qty: Option<f64>,
    #[serde(default)]
    bid2_price: Option<f64>,
    #[serde(default)]
    bid2_qty: Option<f64>,
    #[serde(default)]
    bid3_price: Option<f64>,
    #[serde(default)]
    bid3_qty: Option<f64>,
    #[serde(default)]
    bid4_price: Option<f64>,
    #[serde(default)]
    bid4_qty: Option<f64>,
    #[serde(default)]
    bid5_price: Option<f64>,
    #[serde(default)]
    bid5_qty: Option<f64>,
    #[serde(default)]
    in_watchlist: Option<String>,
}

impl TickRow {
    fn into_snapshot(self, instrument: &str) -> Result<TickSnapshot, TickSweepError> {
        let load_err = |reason: String| TickSweepError::DataLoad {
            instrument: instrument.to_string(),
            reason,
        };
        let timestamp = parse_timestamp(&self.timestamp)
            .ok_or_else(|| load_err(format!("invalid timestamp '{}'", self.timestamp)))?;
        let moving_averages = self
            .ma
            .split_whitespace()
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| load_err(format!("invalid moving average '{}'", v)))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        let in_watchlist = match self.in_watchlist.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "y" | "yes"),
        };

        let asks: [OrderBookLevel; BOOK_LEVELS] = [
            level(self.ask1_price, self.ask1_qty),
            level(self.ask2_price, self.ask2_qty),
            level(self.ask3_price, self.ask3_qty),
            level(self.ask4_price, self.ask4_qty),
            level(self.ask5_price, self.ask5_qty),
        ];
        let bids: [OrderBookLevel; BOOK_LEVELS] = [
            level(self.bid1_price, self.bid1_qty),
            level(self.bid2_price, self.bid2_qty),
            level(self.bid3_price, self.bid3_qty),
            level(self.bid4_price, self.bid4_qty),
            level(self.bid5_price, self.bid5_qty),
        ];

        Ok(TickSnapshot {
            timestamp,
            price: self.price,
            open: self.open.unwrap_or(0.0),
            high: self.high.unwrap_or(0.0),
            low: self.low.unwrap_or(0.0),
            change_pct: self.change_pct.unwrap_or(0.0),
            turnover: self.turnover.unwrap_or(0.0),
            strength: self.strength.unwrap_or(0.0),
            buy_volume: self.buy_volume.unwrap_or(0.0),
            sell_volume: self.sell_volume.unwrap_or(0.0),
            moving_averages,
            asks,
            bids,
            in_watchlist,
        })
    }
}

fn level(price: Option<f64>, quantity: Option<f64>) -> OrderBookLevel {
    OrderBookLevel::new(price.unwrap_or(0.0), quantity.unwrap_or(0.0))
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, instrument: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", instrument))
    }
}

impl DataPort for CsvAdapter {
    fn fetch_ticks(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
        time_range: Option<TimeWindow>,
    ) -> Result<Vec<TickSnapshot>, TickSweepError> {
        let path = self.csv_path(instrument);
        let load_err = |reason: String| TickSweepError::DataLoad {
            instrument: instrument.to_string(),
            reason,
        };
        let content = fs::read_to_string(&path)
            .map_err(|e| load_err(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let mut ticks = Vec::new();
        for (line, result) in rdr.deserialize::<TickRow>().enumerate() {
            let row = result.map_err(|e| load_err(format!("row {}: {}", line + 1, e)))?;
            let tick = row.into_snapshot(instrument)?;
            let date = tick.date();
            if date < start || date > end {
                continue;
            }
            if time_range.is_some_and(|w| !w.contains(tick.time())) {
                continue;
            }
            ticks.push(tick);
        }

        ticks.sort_by_key(|t| t.timestamp);
        Ok(ticks)
    }

    fn list_instruments(&self) -> Result<Vec<String>, TickSweepError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| TickSweepError::DataLoad {
            instrument: "*".into(),
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut instruments = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(instrument) = name_str.strip_suffix(".csv") {
                instruments.push(instrument.to_string());
            }
        }

        instruments.sort();
        Ok(instruments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use tempfile::TempDir;

    const HEADER: &str = "timestamp,price,strength,ma,ask1_price,ask1_qty,ask2_price,ask2_qty,bid1_price,bid1_qty,in_watchlist";

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let content = format!(
            "{HEADER}\n\
             2024-01-03 09:00:01,101,120.5,100 99.5,102,10,103,20,101,7,1\n\
             2024-01-02 09:00:00,100,110,99 98,101,5,102,5,100,3,0\n\
             2024-01-02 15:30:00,105,90,104 103,106,1,,,105,2,\n"
        );
        fs::write(path.join("AAA.csv"), content).unwrap();
        fs::write(path.join("BBB.csv"), format!("{HEADER}\n")).unwrap();
        fs::write(path.join("notes.txt"), "ignored").unwrap();
        (dir, path)
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn fetch_ticks_parses_and_sorts() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let ticks = adapter.fetch_ticks("AAA", d(1), d(31), None).unwrap();

        assert_eq!(ticks.len(), 3);
        assert!(ticks.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        let first = &ticks[0];
        assert_eq!(first.price, 100.0);
        assert_eq!(first.moving_averages, vec![99.0, 98.0]);
        assert_eq!(first.asks[0], OrderBookLevel::new(101.0, 5.0));
        assert_eq!(first.asks[1], OrderBookLevel::new(102.0, 5.0));
        assert!(first.asks[2].is_empty());
        assert!(!first.in_watchlist);
        assert!(ticks[1].in_watchlist);
        assert!(ticks[1].asks[1].is_empty());
    }

    #[test]
    fn fetch_ticks_filters_dates_and_times() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let day = adapter.fetch_ticks("AAA", d(3), d(3), None).unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].price, 101.0);

        let morning = TimeWindow::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        );
        let ticks = adapter.fetch_ticks("AAA", d(1), d(31), Some(morning)).unwrap();
        assert_eq!(ticks.len(), 2);
    }

    #[test]
    fn empty_file_is_no_ticks() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert!(adapter.fetch_ticks("BBB", d(1), d(31), None).unwrap().is_empty());
    }

    #[test]
    fn missing_file_and_bad_rows_are_load_errors() {
        let (dir, path) = setup_test_data();
        fs::write(
            dir.path().join("BAD.csv"),
            format!("{HEADER}\nnot-a-time,100,1,,,,,,,,\n"),
        )
        .unwrap();
        let adapter = CsvAdapter::new(path);
        assert!(matches!(
            adapter.fetch_ticks("XYZ", d(1), d(31), None),
            Err(TickSweepError::DataLoad { .. })
        ));
        assert!(matches!(
            adapter.fetch_ticks("BAD", d(1), d(31), None),
            Err(TickSweepError::DataLoad { .. })
        ));
    }

    #[test]
    fn list_instruments_returns_csv_stems() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert_eq!(adapter.list_instruments().unwrap(), vec!["AAA", "BBB"]);
    }
}
