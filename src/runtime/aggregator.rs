//! Result aggregator.
//!
//! Owns the ledgers of the variants sharded to it. A batch closes on a
//! counting barrier: one `BatchComplete` from every worker. Since a worker's
//! trades travel on the same channel ahead of its `BatchComplete`, a closed
//! barrier means every trade of the batch has arrived.

use std::collections::{HashMap, HashSet};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use super::messages::{AggregatorMessage, AggregatorReport, BatchId, RunInfo, VariantScore};
use crate::domain::ledger::ResultLedger;
use crate::domain::metrics::Summary;
use crate::domain::trade::{TradeResult, VariantKey};

struct BatchState {
    info: RunInfo,
    completed: HashSet<usize>,
    trades: HashMap<VariantKey, Vec<TradeResult>>,
}

/// Outcome of handling one message.
#[derive(Debug)]
pub enum Step {
    Continue,
    Report(AggregatorReport),
    Exit,
}

pub struct ResultAggregator {
    id: usize,
    current: Option<BatchState>,
}

impl ResultAggregator {
    pub fn new(id: usize) -> Self {
        Self { id, current: None }
    }

    pub fn current_batch(&self) -> Option<BatchId> {
        self.current.as_ref().map(|s| s.info.batch)
    }

    pub fn handle(&mut self, msg: AggregatorMessage) -> Step {
        match msg {
            AggregatorMessage::RunInfo(info) => {
                if let Some(old) = self.current.take() {
                    debug!(
                        aggregator = self.id,
                        batch = old.info.batch,
                        "discarding unfinished batch"
                    );
                }
                let workers = info.workers;
                self.current = Some(BatchState {
                    info,
                    completed: HashSet::new(),
                    trades: HashMap::new(),
                });
                if workers == 0 {
                    return self.close();
                }
                Step::Continue
            }
            AggregatorMessage::TradeClosed { batch, trade } => {
                let Some(state) = self.current.as_mut().filter(|s| s.info.batch == batch) else {
                    debug!(aggregator = self.id, batch, "stale trade dropped");
                    return Step::Continue;
                };
                if !state.info.variants.contains(&trade.variant) {
                    warn!(
                        aggregator = self.id,
                        variant = %trade.variant,
                        "trade for a variant this aggregator does not own"
                    );
                    return Step::Continue;
                }
                state.trades.entry(trade.variant).or_default().push(trade);
                Step::Continue
            }
            AggregatorMessage::BatchComplete { batch, worker } => {
                let Some(state) = self.current.as_mut().filter(|s| s.info.batch == batch) else {
                    debug!(aggregator = self.id, batch, worker, "stale completion dropped");
                    return Step::Continue;
                };
                state.completed.insert(worker);
                if state.completed.len() >= state.info.workers {
                    return self.close();
                }
                Step::Continue
            }
            AggregatorMessage::Stop { batch } => {
                if self.current_batch() == Some(batch) {
                    debug!(aggregator = self.id, batch, "batch stopped");
                    self.current = None;
                }
                Step::Continue
            }
            AggregatorMessage::Shutdown => Step::Exit,
        }
    }

    fn close(&mut self) -> Step {
        let Some(mut state) = self.current.take() else {
            return Step::Continue;
        };
        let metric = state.info.metric;
        let forward = state.info.forward_ledgers;
        let scores = state
            .info
            .variants
            .iter()
            .map(|&variant| {
                let mut ledger = ResultLedger::new();
                ledger.insert_batch(state.trades.remove(&variant).unwrap_or_default());
                let summary = Summary::compute(&ledger);
                let score = metric.score(&summary);
                VariantScore {
                    variant,
                    summary,
                    score,
                    trades: if forward {
                        ledger.into_trades()
                    } else {
                        Vec::new()
                    },
                }
            })
            .collect::<Vec<_>>();
        debug!(
            aggregator = self.id,
            batch = state.info.batch,
            variants = scores.len(),
            "batch aggregated"
        );
        Step::Report(AggregatorReport {
            batch: state.info.batch,
            aggregator: self.id,
            scores,
        })
    }

    /// Thread body: handle messages until `Shutdown` or every sender is gone.
    pub fn run(mut self, inbox: Receiver<AggregatorMessage>, reports: Sender<AggregatorReport>) {
        for msg in inbox.iter() {
            match self.handle(msg) {
                Step::Continue => {}
                Step::Report(report) => {
                    if reports.send(report).is_err() {
                        debug!(aggregator = self.id, "dispatcher gone");
                        break;
                    }
                }
                Step::Exit => break,
            }
        }
        debug!(aggregator = self.id, "aggregator exit");
    }
}
