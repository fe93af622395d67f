//! Thread-pool dispatcher: the [`Dispatcher`] the sweep scheduler drives in
//! production.
//!
//! ```text
//! dispatcher --StartBatch--> worker 0..N --TradeClosed/BatchComplete--> aggregator 0..A
//!     ^  \---RunInfo--------------------------------------------------------^      |
//!     |<--Progress/Fatal-- workers                                                 |
//!     |<--AggregatorReport---------------------------------------------------------+
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::aggregator::ResultAggregator;
use super::messages::{
    AggregatorMessage, AggregatorReport, BatchId, RunInfo, VariantScore, WorkerCommand,
    WorkerStatus,
};
use super::worker::{DataRange, EngineWorker, WorkerContext};
use crate::domain::cancel::CancelToken;
use crate::domain::engine::{VariantGroup, VariantSpec};
use crate::domain::error::TickSweepError;
use crate::domain::metrics::ScoreMetric;
use crate::domain::params::VariantParams;
use crate::domain::replay::ReplayConfig;
use crate::domain::strategy::StrategyRules;
use crate::domain::sweep::{
    CandidateParameterSet, Dispatcher, EvalWindow, ParameterSpace, ScoredCandidate,
};
use crate::domain::trade::VariantKey;
use crate::ports::data_port::DataPort;

pub const DEFAULT_AGGREGATORS: usize = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub aggregators: usize,
    pub metric: ScoreMetric,
    /// Return each candidate's trades with its score.
    pub forward_ledgers: bool,
    /// How often a blocked dispatch checks the cancel token.
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            aggregators: DEFAULT_AGGREGATORS,
            metric: ScoreMetric::default(),
            forward_ledgers: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Turns candidates into engine variants: base parameters with the
/// candidate's axis values applied, all under one set of rules.
#[derive(Debug, Clone)]
pub struct CandidateBuilder {
    pub space: ParameterSpace,
    pub base: VariantParams,
    pub rules: StrategyRules,
}

impl CandidateBuilder {
    pub fn new(space: ParameterSpace, base: VariantParams, rules: StrategyRules) -> Self {
        Self { space, base, rules }
    }

    /// Variant `k` of the group is `batch[k]`.
    pub fn groups(
        &self,
        batch: &[CandidateParameterSet],
    ) -> Result<Vec<VariantGroup>, TickSweepError> {
        let variants = batch
            .iter()
            .enumerate()
            .map(|(k, candidate)| {
                Ok(VariantSpec {
                    key: VariantKey::new(0, k),
                    params: self.space.apply(&self.base, candidate)?,
                })
            })
            .collect::<Result<Vec<_>, TickSweepError>>()?;
        Ok(vec![VariantGroup {
            rules: self.rules.clone(),
            variants,
        }])
    }
}

fn channel_closed(what: &str) -> TickSweepError {
    TickSweepError::Channel {
        reason: format!("{} hung up", what),
    }
}

pub struct LocalDispatcher {
    builder: CandidateBuilder,
    config: DispatcherConfig,
    cancel: CancelToken,
    workers: Vec<Sender<WorkerCommand>>,
    aggregators: Vec<Sender<AggregatorMessage>>,
    reports: Receiver<AggregatorReport>,
    status: Receiver<WorkerStatus>,
    handles: Vec<JoinHandle<()>>,
    next_batch: BatchId,
}

impl LocalDispatcher {
    /// Start the aggregator and worker threads. Instruments are dealt to
    /// workers round-robin; a worker may own none.
    pub fn spawn(
        data: Arc<dyn DataPort>,
        instruments: &[String],
        range: DataRange,
        replay: ReplayConfig,
        builder: CandidateBuilder,
        config: DispatcherConfig,
        cancel: CancelToken,
    ) -> Result<Self, TickSweepError> {
        let worker_count = config.workers.max(1);
        let aggregator_count = config.aggregators.max(1);
        let (report_tx, reports) = unbounded();
        let (status_tx, status) = unbounded();
        let mut handles = Vec::with_capacity(worker_count + aggregator_count);

        let mut aggregators = Vec::with_capacity(aggregator_count);
        for id in 0..aggregator_count {
            let (tx, rx) = unbounded();
            let report_tx = report_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("aggregator-{}", id))
                .spawn(move || ResultAggregator::new(id).run(rx, report_tx))?;
            aggregators.push(tx);
            handles.push(handle);
        }
        drop(report_tx);

        let replay = Arc::new(replay);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, rx) = unbounded();
            let ctx = WorkerContext {
                id,
                instruments: instruments
                    .iter()
                    .skip(id)
                    .step_by(worker_count)
                    .cloned()
                    .collect(),
                data: Arc::clone(&data),
                range,
                replay: Arc::clone(&replay),
                cancel: cancel.clone(),
            };
            let worker = EngineWorker::new(ctx, rx, aggregators.clone(), status_tx.clone());
            let handle = thread::Builder::new()
                .name(format!("engine-{}", id))
                .spawn(move || worker.run())?;
            workers.push(tx);
            handles.push(handle);
        }

        info!(
            workers = worker_count,
            aggregators = aggregator_count,
            instruments = instruments.len(),
            "dispatcher ready"
        );
        Ok(Self {
            builder,
            config,
            cancel,
            workers,
            aggregators,
            reports,
            status,
            handles,
            next_batch: 0,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub fn aggregators(&self) -> usize {
        self.aggregators.len()
    }

    /// Tell every thread to drop `batch`. Send failures mean the thread is
    /// already gone, which is fine here.
    fn stop(&self, batch: BatchId) {
        for tx in &self.workers {
            let _ = tx.send(WorkerCommand::Stop { batch });
        }
        for tx in &self.aggregators {
            let _ = tx.send(AggregatorMessage::Stop { batch });
        }
    }

    fn start(
        &mut self,
        batch: &[CandidateParameterSet],
        window: &EvalWindow,
    ) -> Result<BatchId, TickSweepError> {
        let groups = Arc::new(self.builder.groups(batch)?);
        let id = self.next_batch;
        self.next_batch += 1;

        let shards = self.aggregators.len();
        for (a, tx) in self.aggregators.iter().enumerate() {
            let info = RunInfo {
                batch: id,
                workers: self.workers.len(),
                variants: (0..batch.len())
                    .map(|k| VariantKey::new(0, k))
                    .filter(|v| v.shard(shards) == a)
                    .collect(),
                metric: self.config.metric,
                forward_ledgers: self.config.forward_ledgers,
            };
            tx.send(AggregatorMessage::RunInfo(info))
                .map_err(|_| channel_closed("aggregator"))?;
        }
        for tx in &self.workers {
            tx.send(WorkerCommand::StartBatch {
                batch: id,
                window: *window,
                groups: Arc::clone(&groups),
            })
            .map_err(|_| channel_closed("engine worker"))?;
        }
        Ok(id)
    }

    /// Block until every aggregator reported `batch`, a worker fails, or
    /// the run is cancelled.
    fn collect(&self, batch: BatchId, size: usize) -> Result<Vec<VariantScore>, TickSweepError> {
        let mut scores: Vec<Option<VariantScore>> = vec![None; size];
        let mut pending = self.aggregators.len();

        while pending > 0 {
            if self.cancel.is_cancelled() {
                self.stop(batch);
                return Err(TickSweepError::Cancelled);
            }
            select! {
                recv(self.reports) -> msg => {
                    let report = msg.map_err(|_| channel_closed("aggregators"))?;
                    if report.batch == batch {
                        for score in report.scores {
                            if let Some(slot) = scores.get_mut(score.variant.key) {
                                *slot = Some(score);
                            }
                        }
                        pending -= 1;
                    } else {
                        debug!(batch = report.batch, "stale aggregator report");
                    }
                }
                recv(self.status) -> msg => {
                    match msg.map_err(|_| channel_closed("engine workers"))? {
                        WorkerStatus::Progress { batch: b, worker, processed, total } if b == batch => {
                            debug!(batch, worker, processed, total, "progress");
                        }
                        WorkerStatus::Fatal { batch: b, worker, error: e } if b == batch => {
                            error!(batch, worker, error = %e, "batch aborted");
                            self.stop(batch);
                            return Err(e);
                        }
                        _ => {}
                    }
                }
                default(self.config.poll_interval) => {}
            }
        }

        scores
            .into_iter()
            .enumerate()
            .map(|(k, s)| {
                s.ok_or_else(|| TickSweepError::Aborted {
                    reason: format!("batch {} has no score for variant {}", batch, k),
                })
            })
            .collect()
    }
}

impl Dispatcher for LocalDispatcher {
    fn dispatch(
        &mut self,
        batch: &[CandidateParameterSet],
        window: &EvalWindow,
    ) -> Result<Vec<ScoredCandidate>, TickSweepError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if self.cancel.is_cancelled() {
            return Err(TickSweepError::Cancelled);
        }
        let id = self.start(batch, window)?;
        debug!(batch = id, size = batch.len(), %window, "batch started");
        let scores = self.collect(id, batch.len())?;

        Ok(batch
            .iter()
            .zip(scores)
            .map(|(candidate, s)| ScoredCandidate {
                candidate: candidate.clone(),
                score: s.score,
                summary: s.summary,
                trades: s.trades,
            })
            .collect())
    }
}

impl Drop for LocalDispatcher {
    fn drop(&mut self) {
        for tx in &self.workers {
            let _ = tx.send(WorkerCommand::Shutdown);
        }
        for tx in &self.aggregators {
            let _ = tx.send(AggregatorMessage::Shutdown);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("runtime thread panicked");
            }
        }
    }
}
