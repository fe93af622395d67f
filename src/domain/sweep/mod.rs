//! Parameter sweeps.
//!
//! A [`SweepTechnique`] proposes batches of candidates and learns from their
//! scores; a [`Dispatcher`] turns a batch into scores. The scheduler loop in
//! [`ParameterSweepScheduler::run`] is the same for every technique.

pub mod genetic;
pub mod grid;
pub mod random;
pub mod walk_forward;

use std::fmt;

use chrono::NaiveDate;
use tracing::{debug, info};

use super::cancel::CancelToken;
use super::error::TickSweepError;
use super::metrics::Summary;
use super::params::VariantParams;
use super::trade::TradeResult;

/// Upper bound on the values one `start:end:step` axis may expand to.
pub const MAX_AXIS_VALUES: usize = 100_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: String,
    pub values: Vec<f64>,
}

impl Axis {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Parse `v1,v2,...` or `start:end:step`.
    pub fn parse(name: &str, raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(format!("axis '{}' has no values", name));
        }
        let values = if raw.contains(':') {
            parse_range(raw)?
        } else {
            raw.split(',')
                .map(|v| {
                    v.trim()
                        .parse::<f64>()
                        .map_err(|_| format!("axis '{}': invalid value '{}'", name, v.trim()))
                })
                .collect::<Result<Vec<f64>, String>>()?
        };
        if values.iter().any(|v| !v.is_finite()) {
            return Err(format!("axis '{}' has a non-finite value", name));
        }
        Ok(Axis::new(name, values))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn parse_range(raw: &str) -> Result<Vec<f64>, String> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    let [start, end, step] = parts.as_slice() else {
        return Err(format!("range '{}' must be start:end:step", raw));
    };
    let parse = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| format!("range '{}': invalid number '{}'", raw, s))
    };
    let (start, end, step) = (parse(*start)?, parse(*end)?, parse(*step)?);
    if step <= 0.0 || !step.is_finite() {
        return Err(format!("range '{}': step must be positive", raw));
    }
    if end < start {
        return Err(format!("range '{}': end is before start", raw));
    }
    let count = ((end - start) / step + 1e-9).floor() as usize + 1;
    if count > MAX_AXIS_VALUES {
        return Err(format!("range '{}' expands to {} values", raw, count));
    }
    Ok((0..count)
        .map(|i| ((start + i as f64 * step) * 1e10).round() / 1e10)
        .collect())
}

/// Cartesian product of axes. Flat indices decode mixed-radix with the last
/// axis varying fastest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSpace {
    axes: Vec<Axis>,
}

impl ParameterSpace {
    pub fn new(axes: Vec<Axis>) -> Self {
        Self { axes }
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Number of combinations, saturating at `usize::MAX`. An empty space has
    /// exactly one (empty) combination: the base parameters.
    pub fn total(&self) -> usize {
        self.axes
            .iter()
            .try_fold(1usize, |acc, a| acc.checked_mul(a.len()))
            .unwrap_or(usize::MAX)
    }

    pub fn genes_at(&self, mut index: usize) -> Vec<usize> {
        let mut genes = vec![0; self.axes.len()];
        for (slot, axis) in genes.iter_mut().zip(self.axes.iter()).rev() {
            let radix = axis.len().max(1);
            *slot = index % radix;
            index /= radix;
        }
        genes
    }

    pub fn index_of(&self, genes: &[usize]) -> usize {
        genes
            .iter()
            .zip(self.axes.iter())
            .fold(0usize, |acc, (&g, axis)| {
                acc.saturating_mul(axis.len().max(1)).saturating_add(g)
            })
    }

    pub fn candidate(&self, genes: Vec<usize>) -> CandidateParameterSet {
        let values = genes
            .iter()
            .zip(self.axes.iter())
            .map(|(&g, axis)| axis.values.get(g).copied().unwrap_or(f64::NAN))
            .collect();
        CandidateParameterSet {
            index: self.index_of(&genes),
            genes,
            values,
        }
    }

    pub fn combination_at(&self, index: usize) -> CandidateParameterSet {
        self.candidate(self.genes_at(index))
    }

    /// `base` with every axis value of `candidate` applied.
    pub fn apply(
        &self,
        base: &VariantParams,
        candidate: &CandidateParameterSet,
    ) -> Result<VariantParams, TickSweepError> {
        let mut params = base.clone();
        for (axis, &value) in self.axes.iter().zip(candidate.values.iter()) {
            params
                .set(&axis.name, value)
                .map_err(|reason| TickSweepError::ConfigInvalid {
                    section: "axes".into(),
                    key: axis.name.clone(),
                    reason,
                })?;
        }
        Ok(params)
    }

    pub fn describe(&self, candidate: &CandidateParameterSet) -> String {
        self.axes
            .iter()
            .zip(candidate.values.iter())
            .map(|(a, v)| format!("{}={}", a.name, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One point of the sweep. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateParameterSet {
    /// Flat index in the parameter space.
    pub index: usize,
    /// Per-axis value index.
    pub genes: Vec<usize>,
    pub values: Vec<f64>,
}

impl fmt::Display for CandidateParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {:?}", self.index, self.values)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: CandidateParameterSet,
    pub score: f64,
    pub summary: Summary,
    /// Ledger in key order; only filled when the dispatcher forwards ledgers.
    pub trades: Vec<TradeResult>,
}

/// Inclusive date range a batch is evaluated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl EvalWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn overlaps(&self, other: &EvalWindow) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for EvalWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Scores a batch of candidates over a window. Results come back in batch order.
pub trait Dispatcher {
    fn dispatch(
        &mut self,
        batch: &[CandidateParameterSet],
        window: &EvalWindow,
    ) -> Result<Vec<ScoredCandidate>, TickSweepError>;
}

pub trait SweepTechnique {
    fn name(&self) -> &'static str;

    /// Next batch to evaluate; `None` once the technique is finished.
    fn next_batch(&mut self) -> Option<Vec<CandidateParameterSet>>;

    fn observe(&mut self, results: &[ScoredCandidate]);
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub technique: String,
    pub window: EvalWindow,
    /// Every scored candidate, best first.
    pub results: Vec<ScoredCandidate>,
    pub batches: usize,
}

impl SweepReport {
    pub fn best(&self) -> Option<&ScoredCandidate> {
        self.results.first()
    }

    pub fn top(&self, k: usize) -> &[ScoredCandidate] {
        &self.results[..k.min(self.results.len())]
    }
}

/// Sort best first; ties keep the lower space index first.
pub fn rank(results: &mut [ScoredCandidate]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.candidate.index.cmp(&b.candidate.index))
    });
}

pub struct ParameterSweepScheduler;

impl ParameterSweepScheduler {
    /// Drive `technique` to completion through `dispatcher`.
    ///
    /// Cancellation between or during batches unwinds with `Cancelled` and
    /// no partial report.
    pub fn run(
        technique: &mut dyn SweepTechnique,
        dispatcher: &mut dyn Dispatcher,
        window: &EvalWindow,
        cancel: &CancelToken,
    ) -> Result<SweepReport, TickSweepError> {
        info!(technique = technique.name(), %window, "sweep start");
        let mut results: Vec<ScoredCandidate> = Vec::new();
        let mut batches = 0usize;

        while let Some(batch) = technique.next_batch() {
            if cancel.is_cancelled() {
                return Err(TickSweepError::Cancelled);
            }
            if batch.is_empty() {
                continue;
            }
            debug!(batch = batches, size = batch.len(), "dispatching batch");
            let scored = dispatcher.dispatch(&batch, window)?;
            if cancel.is_cancelled() {
                return Err(TickSweepError::Cancelled);
            }
            technique.observe(&scored);
            results.extend(scored);
            batches += 1;
        }

        rank(&mut results);
        if let Some(best) = results.first() {
            info!(
                technique = technique.name(),
                evaluated = results.len(),
                best_score = best.score,
                best = %best.candidate,
                "sweep done"
            );
        }
        Ok(SweepReport {
            technique: technique.name().to_string(),
            window: *window,
            results,
            batches,
        })
    }
}
