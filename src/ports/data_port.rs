//! Tick data access port trait.

use crate::domain::error::TickSweepError;
use crate::domain::replay::TimeWindow;
use crate::domain::tick::TickSnapshot;
use chrono::NaiveDate;

/// Source of historical ticks. Shared by every engine worker thread.
pub trait DataPort: Send + Sync {
    /// Ticks for `instrument` dated `start..=end`, ordered by timestamp,
    /// optionally restricted to an intraday `time_range`.
    ///
    /// An instrument with no ticks in range is `Ok(vec![])`, not an error.
    fn fetch_ticks(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
        time_range: Option<TimeWindow>,
    ) -> Result<Vec<TickSnapshot>, TickSweepError>;

    fn list_instruments(&self) -> Result<Vec<String>, TickSweepError>;
}
