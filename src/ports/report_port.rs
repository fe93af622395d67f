//! Report output port trait.

use std::path::Path;

use crate::domain::error::TickSweepError;
use crate::domain::ledger::PositionPoint;
use crate::domain::sweep::walk_forward::WalkForwardReport;
use crate::domain::sweep::{ParameterSpace, ScoredCandidate};
use crate::domain::trade::TradeResult;

/// Port for writing replay and sweep results.
pub trait ReportPort {
    /// One row per exit fill, in ledger order.
    fn write_ledger(&self, trades: &[TradeResult], path: &Path) -> Result<(), TickSweepError>;

    fn write_position_series(
        &self,
        series: &[PositionPoint],
        path: &Path,
    ) -> Result<(), TickSweepError>;

    /// Ranked sweep results with one column per axis of `space`.
    fn write_sweep_results(
        &self,
        space: &ParameterSpace,
        results: &[ScoredCandidate],
        path: &Path,
    ) -> Result<(), TickSweepError>;

    fn write_walk_forward(
        &self,
        space: &ParameterSpace,
        report: &WalkForwardReport,
        path: &Path,
    ) -> Result<(), TickSweepError>;
}
