//! Summary statistics over a variant's ledger, and the ranking score.

use std::fmt;
use std::str::FromStr;

use super::ledger::{position_peaks, ResultLedger};
use super::trade::TradeResult;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    /// Exit fills, partial exits included.
    pub trade_count: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    /// Mean of per-trade profit ratios, percent.
    pub avg_profit_ratio: f64,
    /// Sum of per-trade profit ratios, percent.
    pub total_profit_ratio: f64,
    pub total_profit_amount: f64,
    /// Mean over standard deviation of profit ratios, scaled by sqrt(n).
    pub risk_adjusted: f64,
    /// Largest peak-to-trough fall of the cumulative profit amount.
    pub max_drawdown: f64,
    pub avg_hold_secs: f64,
    pub peak_positions: i64,
    pub required_capital: f64,
}

impl Summary {
    pub fn compute(ledger: &ResultLedger) -> Self {
        let trades: Vec<&TradeResult> = ledger.trades().collect();
        let mut summary = Self::from_trades(&trades);
        let (peak_positions, required_capital) = position_peaks(&ledger.position_series());
        summary.peak_positions = peak_positions;
        summary.required_capital = required_capital;
        summary
    }

    /// Everything except the position peaks. `trades` must be in ledger order.
    pub fn from_trades(trades: &[&TradeResult]) -> Self {
        let n = trades.len();
        if n == 0 {
            return Summary::default();
        }

        let wins = trades.iter().filter(|t| t.profit_amount > 0.0).count();
        let losses = trades.iter().filter(|t| t.profit_amount < 0.0).count();
        let ratios: Vec<f64> = trades.iter().map(|t| t.profit_ratio).collect();
        let total_profit_ratio: f64 = ratios.iter().sum();
        let total_profit_amount: f64 = trades.iter().map(|t| t.profit_amount).sum();
        let avg_profit_ratio = total_profit_ratio / n as f64;
        let avg_hold_secs = trades.iter().map(|t| t.hold_secs as f64).sum::<f64>() / n as f64;

        Summary {
            trade_count: n,
            wins,
            losses,
            win_rate: wins as f64 / n as f64,
            avg_profit_ratio,
            total_profit_ratio,
            total_profit_amount,
            risk_adjusted: risk_adjusted(&ratios),
            max_drawdown: max_drawdown(trades.iter().map(|t| t.profit_amount)),
            avg_hold_secs,
            peak_positions: 0,
            required_capital: 0.0,
        }
    }
}

fn risk_adjusted(ratios: &[f64]) -> f64 {
    if ratios.len() < 2 {
        return 0.0;
    }
    let n = ratios.len() as f64;
    let mean = ratios.iter().sum::<f64>() / n;
    let variance = ratios.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev > 0.0 {
        mean / stddev * n.sqrt()
    } else {
        0.0
    }
}

fn max_drawdown(profits: impl Iterator<Item = f64>) -> f64 {
    let mut equity = 0.0f64;
    let mut peak = 0.0f64;
    let mut max_dd = 0.0f64;
    for p in profits {
        equity += p;
        if equity > peak {
            peak = equity;
        }
        let dd = peak - equity;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}

/// Which summary statistic ranks variants. Higher is better for every metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreMetric {
    #[default]
    TotalProfit,
    AvgProfitRatio,
    WinRate,
    RiskAdjusted,
    /// Total profit amount over max drawdown.
    ProfitToDrawdown,
}

impl ScoreMetric {
    pub fn score(self, summary: &Summary) -> f64 {
        if summary.trade_count == 0 {
            return 0.0;
        }
        match self {
            ScoreMetric::TotalProfit => summary.total_profit_amount,
            ScoreMetric::AvgProfitRatio => summary.avg_profit_ratio,
            ScoreMetric::WinRate => summary.win_rate,
            ScoreMetric::RiskAdjusted => summary.risk_adjusted,
            ScoreMetric::ProfitToDrawdown => {
                if summary.max_drawdown > 0.0 {
                    summary.total_profit_amount / summary.max_drawdown
                } else {
                    summary.total_profit_amount
                }
            }
        }
    }
}

impl fmt::Display for ScoreMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScoreMetric::TotalProfit => "total_profit",
            ScoreMetric::AvgProfitRatio => "avg_profit_ratio",
            ScoreMetric::WinRate => "win_rate",
            ScoreMetric::RiskAdjusted => "risk_adjusted",
            ScoreMetric::ProfitToDrawdown => "profit_to_drawdown",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ScoreMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "total_profit" => Ok(ScoreMetric::TotalProfit),
            "avg_profit_ratio" => Ok(ScoreMetric::AvgProfitRatio),
            "win_rate" => Ok(ScoreMetric::WinRate),
            "risk_adjusted" | "sharpe" => Ok(ScoreMetric::RiskAdjusted),
            "profit_to_drawdown" => Ok(ScoreMetric::ProfitToDrawdown),
            other => Err(format!("unknown score metric '{}'", other)),
        }
    }
}
