//! Engine worker thread.
//!
//! A worker owns a fixed slice of the instrument universe and a read-only
//! tick cache for it. For each `StartBatch` it replays every owned
//! instrument over the batch window, streams closed trades to the owning
//! aggregator, then tells every aggregator it is done.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, error, warn};

use super::messages::{AggregatorMessage, BatchId, WorkerCommand, WorkerStatus};
use crate::domain::cancel::CancelToken;
use crate::domain::engine::{ReplayObserver, TickSimulationEngine, VariantGroup};
use crate::domain::error::TickSweepError;
use crate::domain::replay::{ReplayConfig, TimeWindow};
use crate::domain::sweep::EvalWindow;
use crate::domain::tick::{slice_by_date, TickSnapshot};
use crate::domain::trade::TradeResult;
use crate::ports::data_port::DataPort;

/// The full span of data a worker loads once and slices per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub time_range: Option<TimeWindow>,
}

pub struct WorkerContext {
    pub id: usize,
    pub instruments: Vec<String>,
    pub data: Arc<dyn DataPort>,
    pub range: DataRange,
    pub replay: Arc<ReplayConfig>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Stop,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchEnd {
    Completed,
    Abandoned,
    Shutdown,
}

pub struct EngineWorker {
    ctx: WorkerContext,
    cache: HashMap<String, Arc<[TickSnapshot]>>,
    commands: Receiver<WorkerCommand>,
    shards: Vec<Sender<AggregatorMessage>>,
    status: Sender<WorkerStatus>,
}

impl EngineWorker {
    pub fn new(
        ctx: WorkerContext,
        commands: Receiver<WorkerCommand>,
        shards: Vec<Sender<AggregatorMessage>>,
        status: Sender<WorkerStatus>,
    ) -> Self {
        Self {
            ctx,
            cache: HashMap::new(),
            commands,
            shards,
            status,
        }
    }

    /// Thread body: serve commands until `Shutdown` or the dispatcher is gone.
    pub fn run(mut self) {
        debug!(
            worker = self.ctx.id,
            instruments = self.ctx.instruments.len(),
            "engine worker start"
        );
        while let Ok(cmd) = self.commands.recv() {
            match cmd {
                WorkerCommand::StartBatch {
                    batch,
                    window,
                    groups,
                } => {
                    if self.run_batch(batch, &window, &groups) == BatchEnd::Shutdown {
                        break;
                    }
                }
                // Arrives after the batch already finished here.
                WorkerCommand::Stop { .. } => {}
                WorkerCommand::Shutdown => break,
            }
        }
        debug!(worker = self.ctx.id, "engine worker exit");
    }

    /// Cached ticks for `instrument`. A load failure is logged once and
    /// cached as empty; the instrument then simply produces no trades.
    fn ticks(&mut self, instrument: &str) -> Result<Arc<[TickSnapshot]>, TickSweepError> {
        if let Some(ticks) = self.cache.get(instrument) {
            return Ok(Arc::clone(ticks));
        }
        let range = self.ctx.range;
        let ticks: Arc<[TickSnapshot]> = match self.ctx.data.fetch_ticks(
            instrument,
            range.start,
            range.end,
            range.time_range,
        ) {
            Ok(ticks) => Arc::from(ticks),
            Err(e @ TickSweepError::DataLoad { .. }) => {
                warn!(worker = self.ctx.id, instrument, error = %e, "skipping instrument");
                Arc::from(Vec::new())
            }
            Err(e) => return Err(e),
        };
        if ticks.is_empty() {
            debug!(worker = self.ctx.id, instrument, "no ticks in range");
        }
        self.cache.insert(instrument.to_string(), Arc::clone(&ticks));
        Ok(ticks)
    }

    fn run_batch(&mut self, batch: BatchId, window: &EvalWindow, groups: &[VariantGroup]) -> BatchEnd {
        let replay = Arc::clone(&self.ctx.replay);
        let engine = TickSimulationEngine::new(&replay);
        let instruments = self.ctx.instruments.clone();
        let mut trades = 0usize;

        for instrument in &instruments {
            let loaded = match self.ticks(instrument) {
                Ok(ticks) => ticks,
                Err(e) => return self.fail(batch, e),
            };
            let ticks = slice_by_date(&loaded, window.start, window.end);
            if ticks.is_empty() {
                continue;
            }

            let mut observer = BatchObserver {
                batch,
                worker: self.ctx.id,
                shards: &self.shards,
                status: &self.status,
                commands: &self.commands,
                cancel: &self.ctx.cancel,
                interrupt: None,
            };
            let result = engine.run(instrument, ticks, groups, &mut observer);
            let interrupt = observer.interrupt;
            match result {
                Ok(outcome) => trades += outcome.trades,
                Err(TickSweepError::Cancelled) => {
                    debug!(worker = self.ctx.id, batch, instrument, "batch interrupted");
                    return match interrupt {
                        Some(Interrupt::Shutdown) => BatchEnd::Shutdown,
                        _ => BatchEnd::Abandoned,
                    };
                }
                Err(e) => return self.fail(batch, e),
            }
        }

        for shard in &self.shards {
            let done = AggregatorMessage::BatchComplete {
                batch,
                worker: self.ctx.id,
            };
            if shard.send(done).is_err() {
                return BatchEnd::Shutdown;
            }
        }
        debug!(worker = self.ctx.id, batch, trades, "batch complete");
        BatchEnd::Completed
    }

    fn fail(&self, batch: BatchId, error: TickSweepError) -> BatchEnd {
        error!(worker = self.ctx.id, batch, error = %error, "batch failed");
        let fatal = WorkerStatus::Fatal {
            batch,
            worker: self.ctx.id,
            error,
        };
        if self.status.send(fatal).is_err() {
            return BatchEnd::Shutdown;
        }
        BatchEnd::Abandoned
    }
}

struct BatchObserver<'a> {
    batch: BatchId,
    worker: usize,
    shards: &'a [Sender<AggregatorMessage>],
    status: &'a Sender<WorkerStatus>,
    commands: &'a Receiver<WorkerCommand>,
    cancel: &'a CancelToken,
    interrupt: Option<Interrupt>,
}

impl ReplayObserver for BatchObserver<'_> {
    fn on_trade(&mut self, trade: TradeResult) -> Result<(), TickSweepError> {
        let shard = trade.variant.shard(self.shards.len());
        let tx = self.shards.get(shard).ok_or_else(|| TickSweepError::Channel {
            reason: format!("no aggregator for shard {}", shard),
        })?;
        tx.send(AggregatorMessage::TradeClosed {
            batch: self.batch,
            trade,
        })
        .map_err(|_| TickSweepError::Channel {
            reason: format!("aggregator {} hung up", shard),
        })
    }

    fn on_progress(&mut self, processed: usize, total: usize) {
        let _ = self.status.send(WorkerStatus::Progress {
            batch: self.batch,
            worker: self.worker,
            processed,
            total,
        });
    }

    fn should_stop(&mut self) -> bool {
        if self.interrupt.is_some() {
            return true;
        }
        if self.cancel.is_cancelled() {
            self.interrupt = Some(Interrupt::Stop);
            return true;
        }
        loop {
            match self.commands.try_recv() {
                Ok(WorkerCommand::Stop { batch }) if batch == self.batch => {
                    self.interrupt = Some(Interrupt::Stop);
                    return true;
                }
                Ok(WorkerCommand::Stop { .. }) => {}
                Ok(WorkerCommand::StartBatch { batch, .. }) => {
                    warn!(worker = self.worker, batch, "batch started while busy, ignored");
                }
                Ok(WorkerCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                    self.interrupt = Some(Interrupt::Shutdown);
                    return true;
                }
                Err(TryRecvError::Empty) => return false,
            }
        }
    }
}
