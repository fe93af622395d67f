//! Control-plane and result messages exchanged between the dispatcher,
//! engine workers and aggregators.
//!
//! Every message that belongs to a batch carries its [`BatchId`]; receivers
//! drop anything tagged with a batch they are not currently running.

use std::sync::Arc;

use crate::domain::engine::VariantGroup;
use crate::domain::error::TickSweepError;
use crate::domain::metrics::{ScoreMetric, Summary};
use crate::domain::sweep::EvalWindow;
use crate::domain::trade::{TradeResult, VariantKey};

pub type BatchId = u64;

/// Dispatcher -> engine worker.
#[derive(Debug)]
pub enum WorkerCommand {
    StartBatch {
        batch: BatchId,
        window: EvalWindow,
        groups: Arc<Vec<VariantGroup>>,
    },
    Stop {
        batch: BatchId,
    },
    Shutdown,
}

/// What an aggregator needs to know before a batch starts.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub batch: BatchId,
    /// Workers whose `BatchComplete` closes the barrier.
    pub workers: usize,
    /// Variants owned by this aggregator.
    pub variants: Vec<VariantKey>,
    pub metric: ScoreMetric,
    /// Send each variant's ledger back with its score.
    pub forward_ledgers: bool,
}

/// Dispatcher and engine workers -> aggregator, on one FIFO channel per
/// aggregator. `RunInfo` is always enqueued before the workers are started,
/// and a worker's trades always precede its `BatchComplete`.
#[derive(Debug)]
pub enum AggregatorMessage {
    RunInfo(RunInfo),
    TradeClosed { batch: BatchId, trade: TradeResult },
    BatchComplete { batch: BatchId, worker: usize },
    Stop { batch: BatchId },
    Shutdown,
}

/// Engine worker -> dispatcher.
#[derive(Debug)]
pub enum WorkerStatus {
    Progress {
        batch: BatchId,
        worker: usize,
        processed: usize,
        total: usize,
    },
    /// The batch cannot produce a result. The worker has already given up on it.
    Fatal {
        batch: BatchId,
        worker: usize,
        error: TickSweepError,
    },
}

#[derive(Debug, Clone)]
pub struct VariantScore {
    pub variant: VariantKey,
    pub summary: Summary,
    pub score: f64,
    /// Ledger order. Empty unless the batch forwards ledgers.
    pub trades: Vec<TradeResult>,
}

/// Aggregator -> dispatcher, once per batch after the barrier closes.
#[derive(Debug, Clone)]
pub struct AggregatorReport {
    pub batch: BatchId,
    pub aggregator: usize,
    pub scores: Vec<VariantScore>,
}
