//! CSV report adapter.

use std::fmt::Display;
use std::fs;
use std::path::Path;

use csv::Writer;
use serde::Serialize;

use crate::domain::error::TickSweepError;
use crate::domain::ledger::PositionPoint;
use crate::domain::sweep::walk_forward::WalkForwardReport;
use crate::domain::sweep::{ParameterSpace, ScoredCandidate};
use crate::domain::trade::TradeResult;
use crate::ports::report_port::ReportPort;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Serialize)]
struct LedgerRow<'a> {
    instrument: &'a str,
    group: usize,
    variant: usize,
    buy_time: String,
    sell_time: String,
    hold_secs: i64,
    buy_price: f64,
    sell_price: f64,
    quantity: f64,
    buy_amount: f64,
    sell_amount: f64,
    profit_ratio: f64,
    profit_amount: f64,
    reason: String,
    reason_code: u8,
    buy_fills: usize,
    fully_closed: bool,
}

impl<'a> From<&'a TradeResult> for LedgerRow<'a> {
    fn from(t: &'a TradeResult) -> Self {
        LedgerRow {
            instrument: &t.instrument,
            group: t.variant.group,
            variant: t.variant.key,
            buy_time: t.buy_time.format(TIME_FORMAT).to_string(),
            sell_time: t.sell_time.format(TIME_FORMAT).to_string(),
            hold_secs: t.hold_secs,
            buy_price: t.buy_price,
            sell_price: t.sell_price,
            quantity: t.quantity,
            buy_amount: t.buy_amount,
            sell_amount: t.sell_amount,
            profit_ratio: t.profit_ratio,
            profit_amount: t.profit_amount,
            reason: t.reason.to_string(),
            reason_code: t.reason.code(),
            buy_fills: t.buy_log.len(),
            fully_closed: t.fully_closed,
        }
    }
}

#[derive(Serialize)]
struct PositionRow {
    time: String,
    open_positions: i64,
    capital: f64,
}

pub struct CsvReportAdapter;

fn report_err(path: &Path, e: impl Display) -> TickSweepError {
    TickSweepError::Report {
        reason: format!("{}: {}", path.display(), e),
    }
}

fn create_writer(path: &Path) -> Result<Writer<fs::File>, TickSweepError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Writer::from_path(path).map_err(|e| report_err(path, e))
}

fn summary_headers() -> [&'static str; 9] {
    [
        "trades",
        "win_rate",
        "avg_profit_ratio",
        "total_profit_ratio",
        "total_profit_amount",
        "risk_adjusted",
        "max_drawdown",
        "peak_positions",
        "required_capital",
    ]
}

fn summary_fields(r: &ScoredCandidate) -> Vec<String> {
    let s = &r.summary;
    vec![
        s.trade_count.to_string(),
        s.win_rate.to_string(),
        s.avg_profit_ratio.to_string(),
        s.total_profit_ratio.to_string(),
        s.total_profit_amount.to_string(),
        s.risk_adjusted.to_string(),
        s.max_drawdown.to_string(),
        s.peak_positions.to_string(),
        s.required_capital.to_string(),
    ]
}

impl ReportPort for CsvReportAdapter {
    fn write_ledger(&self, trades: &[TradeResult], path: &Path) -> Result<(), TickSweepError> {
        let mut writer = create_writer(path)?;
        for trade in trades {
            writer
                .serialize(LedgerRow::from(trade))
                .map_err(|e| report_err(path, e))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_position_series(
        &self,
        series: &[PositionPoint],
        path: &Path,
    ) -> Result<(), TickSweepError> {
        let mut writer = create_writer(path)?;
        for p in series {
            let row = PositionRow {
                time: p.time.format(TIME_FORMAT).to_string(),
                open_positions: p.open_positions,
                capital: p.capital,
            };
            writer.serialize(&row).map_err(|e| report_err(path, e))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_sweep_results(
        &self,
        space: &ParameterSpace,
        results: &[ScoredCandidate],
        path: &Path,
    ) -> Result<(), TickSweepError> {
        let mut writer = create_writer(path)?;
        let mut header: Vec<String> = vec!["rank".into(), "index".into(), "score".into()];
        header.extend(space.axes().iter().map(|a| a.name.clone()));
        header.extend(summary_headers().iter().map(|h| h.to_string()));
        writer
            .write_record(&header)
            .map_err(|e| report_err(path, e))?;

        for (rank, r) in results.iter().enumerate() {
            let mut record = vec![
                (rank + 1).to_string(),
                r.candidate.index.to_string(),
                r.score.to_string(),
            ];
            record.extend(r.candidate.values.iter().map(|v| v.to_string()));
            record.extend(summary_fields(r));
            writer
                .write_record(&record)
                .map_err(|e| report_err(path, e))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_walk_forward(
        &self,
        space: &ParameterSpace,
        report: &WalkForwardReport,
        path: &Path,
    ) -> Result<(), TickSweepError> {
        let mut writer = create_writer(path)?;
        let mut header: Vec<String> = [
            "fold",
            "train_start",
            "train_end",
            "validation_start",
            "validation_end",
            "rank",
            "index",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect();
        header.extend(space.axes().iter().map(|a| a.name.clone()));
        header.extend(
            ["train_score", "validation_score", "validation_trades"]
                .iter()
                .map(|h| h.to_string()),
        );
        writer
            .write_record(&header)
            .map_err(|e| report_err(path, e))?;

        for fold in &report.folds {
            for (rank, v) in fold.validation.iter().enumerate() {
                let train_score = fold
                    .train
                    .results
                    .iter()
                    .find(|t| t.candidate.index == v.candidate.index)
                    .map_or(0.0, |t| t.score);
                let mut record = vec![
                    fold.fold.index.to_string(),
                    fold.fold.train.start.to_string(),
                    fold.fold.train.end.to_string(),
                    fold.fold.validation.start.to_string(),
                    fold.fold.validation.end.to_string(),
                    (rank + 1).to_string(),
                    v.candidate.index.to_string(),
                ];
                record.extend(v.candidate.values.iter().map(|x| x.to_string()));
                record.push(train_score.to_string());
                record.push(v.score.to_string());
                record.push(v.summary.trade_count.to_string());
                writer
                    .write_record(&record)
                    .map_err(|e| report_err(path, e))?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}
