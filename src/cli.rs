//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::cancel::CancelToken;
use crate::domain::config_validation::{
    parse_date, parse_param_value, parse_rule, validate_axes, validate_run_config,
    validate_sweep_config,
};
use crate::domain::error::TickSweepError;
use crate::domain::ledger::ResultLedger;
use crate::domain::market::Market;
use crate::domain::metrics::{ScoreMetric, Summary};
use crate::domain::params::VariantParams;
use crate::domain::rule_parser;
use crate::domain::replay::{
    parse_time, ReplayConfig, TimeWindow, DEFAULT_LOOKBACK_TICKS, DEFAULT_PROGRESS_INTERVAL,
};
use crate::domain::strategy::StrategyRules;
use crate::domain::sweep::genetic::{GeneticConfig, GeneticSearch};
use crate::domain::sweep::grid::GridSearch;
use crate::domain::sweep::random::RandomSearch;
use crate::domain::sweep::walk_forward::{build_folds, run_walk_forward, WalkForwardConfig};
use crate::domain::sweep::{
    Dispatcher, EvalWindow, ParameterSpace, ParameterSweepScheduler, SweepTechnique,
};
use crate::domain::tick::BOOK_LEVELS;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;
use crate::runtime::dispatcher::{
    CandidateBuilder, DispatcherConfig, LocalDispatcher, DEFAULT_AGGREGATORS,
};
use crate::runtime::worker::DataRange;

#[derive(Parser, Debug)]
#[command(name = "ticksweep", about = "Tick-replay backtester and parameter sweeper")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay the base [variant] parameters once and write the ledger
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long, default_value = "out")]
        output: PathBuf,
        /// Replay only this instrument
        #[arg(long)]
        instrument: Option<String>,
    },
    /// Search the [axes] parameter space
    Sweep {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long, default_value = "out")]
        output: PathBuf,
        /// Override [sweep] technique (grid, random, genetic, walk_forward)
        #[arg(long)]
        technique: Option<Technique>,
        /// Override [sweep] workers
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Validate a config and its rules without replaying
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List instruments available in the data directory
    ListInstruments {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Run {
            config,
            output,
            instrument,
        } => run_replay(&config, &output, instrument.as_deref()),
        Command::Sweep {
            config,
            output,
            technique,
            workers,
        } => run_sweep(&config, &output, technique, workers),
        Command::Validate { config } => run_validate(&config),
        Command::ListInstruments { config } => run_list_instruments(&config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, TickSweepError> {
    FileConfigAdapter::from_file(path).map_err(|e| TickSweepError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn non_empty(adapter: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    adapter
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Non-negative integer setting. Values were range-checked by validation.
fn count(adapter: &dyn ConfigPort, section: &str, key: &str, default: usize) -> usize {
    adapter
        .get_double(section, key, default as f64)
        .max(0.0)
        .round() as usize
}

fn comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub instruments: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub time_range: Option<TimeWindow>,
}

impl DataConfig {
    pub fn range(&self) -> DataRange {
        DataRange {
            start: self.start_date,
            end: self.end_date,
            time_range: self.time_range,
        }
    }

    pub fn window(&self) -> EvalWindow {
        EvalWindow::new(self.start_date, self.end_date)
    }
}

pub fn build_data_config(adapter: &dyn ConfigPort) -> Result<DataConfig, TickSweepError> {
    let data_dir = non_empty(adapter, "data", "data_dir").ok_or_else(|| {
        TickSweepError::ConfigMissing {
            section: "data".into(),
            key: "data_dir".into(),
        }
    })?;
    let instruments = comma_list(&adapter.get_string("data", "instruments").unwrap_or_default());
    let start_date = parse_date(adapter, "data", "start_date")?;
    let end_date = parse_date(adapter, "data", "end_date")?;

    let time = |key: &str| -> Result<Option<chrono::NaiveTime>, TickSweepError> {
        non_empty(adapter, "data", key)
            .map(|s| {
                parse_time(&s).map_err(|reason| TickSweepError::ConfigInvalid {
                    section: "data".into(),
                    key: key.into(),
                    reason,
                })
            })
            .transpose()
    };
    let time_range = match (time("start_time")?, time("end_time")?) {
        (None, None) => None,
        (start, end) => Some(TimeWindow::new(
            start.unwrap_or(chrono::NaiveTime::MIN),
            // Half-open, so the last instant of the day.
            end.unwrap_or(chrono::NaiveTime::MIN - chrono::Duration::nanoseconds(1)),
        )),
    };

    Ok(DataConfig {
        data_dir: PathBuf::from(data_dir),
        instruments,
        start_date,
        end_date,
        time_range,
    })
}

pub fn build_replay_config(adapter: &dyn ConfigPort) -> Result<ReplayConfig, TickSweepError> {
    let invalid = |key: &str, reason: String| TickSweepError::ConfigInvalid {
        section: "replay".into(),
        key: key.into(),
        reason,
    };

    let market = match non_empty(adapter, "replay", "market") {
        Some(m) => m.parse::<Market>().map_err(|r| invalid("market", r))?,
        None => Market::Equity,
    };
    let day_end_time = non_empty(adapter, "replay", "day_end_time")
        .map(|s| parse_time(&s).map_err(|r| invalid("day_end_time", r)))
        .transpose()?;
    let forbidden_windows = comma_list(
        &adapter
            .get_string("replay", "forbidden_windows")
            .unwrap_or_default(),
    )
    .iter()
    .map(|w| {
        w.parse::<TimeWindow>()
            .map_err(|r| invalid("forbidden_windows", r))
    })
    .collect::<Result<Vec<_>, _>>()?;
    let blacklist: HashSet<String> =
        comma_list(&adapter.get_string("replay", "blacklist").unwrap_or_default())
            .into_iter()
            .collect();

    Ok(ReplayConfig {
        market,
        blacklist,
        forbidden_windows,
        price_floor: adapter.get_double("replay", "price_floor", 0.0).max(0.0),
        day_end_time,
        book_depth: count(adapter, "replay", "book_depth", BOOK_LEVELS).clamp(1, BOOK_LEVELS),
        progress_interval: count(
            adapter,
            "replay",
            "progress_interval",
            DEFAULT_PROGRESS_INTERVAL,
        )
        .max(1),
        lookback_ticks: count(adapter, "replay", "lookback_ticks", DEFAULT_LOOKBACK_TICKS).max(1),
    })
}

/// Defaults overlaid with every `[variant]` entry.
pub fn build_variant_params(adapter: &dyn ConfigPort) -> Result<VariantParams, TickSweepError> {
    let mut params = VariantParams::default();
    for key in adapter.keys("variant") {
        let Some(raw) = non_empty(adapter, "variant", &key) else {
            continue;
        };
        parse_param_value(&key, &raw)
            .and_then(|v| params.set(&key, v))
            .map_err(|reason| TickSweepError::ConfigInvalid {
                section: "variant".into(),
                key: key.clone(),
                reason,
            })?;
    }
    Ok(params)
}

pub fn build_strategy_rules(
    adapter: &dyn ConfigPort,
    lookback_ticks: usize,
) -> Result<StrategyRules, TickSweepError> {
    let name = non_empty(adapter, "strategy", "name").unwrap_or_else(|| "Unnamed".to_string());
    let entry_src = non_empty(adapter, "strategy", "entry").ok_or_else(|| {
        TickSweepError::ConfigMissing {
            section: "strategy".into(),
            key: "entry".into(),
        }
    })?;
    let entry = parse_rule(&entry_src, true, lookback_ticks)?;
    let mut rules = StrategyRules::new(name, Arc::new(entry));
    if let Some(exit_src) = non_empty(adapter, "strategy", "exit") {
        rules = rules.with_exit(Arc::new(parse_rule(&exit_src, false, lookback_ticks)?));
    }
    Ok(rules)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technique {
    Grid,
    Random,
    Genetic,
    WalkForward,
}

impl FromStr for Technique {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "grid" => Ok(Technique::Grid),
            "random" => Ok(Technique::Random),
            "genetic" => Ok(Technique::Genetic),
            "walk_forward" | "walk-forward" => Ok(Technique::WalkForward),
            other => Err(format!("unknown technique '{}'", other)),
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Technique::Grid => "grid",
            Technique::Random => "random",
            Technique::Genetic => "genetic",
            Technique::WalkForward => "walk_forward",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub technique: Technique,
    pub score: ScoreMetric,
    pub workers: usize,
    pub aggregators: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub shuffle: bool,
    pub max_samples: Option<usize>,
    pub random_iterations: usize,
    pub random_time_budget: Option<Duration>,
    pub genetic: GeneticConfig,
    pub walk_forward: WalkForwardConfig,
    /// Search run on each walk-forward train window.
    pub wf_technique: Technique,
}

pub fn build_sweep_config(adapter: &dyn ConfigPort) -> Result<SweepConfig, TickSweepError> {
    let invalid = |key: &str, reason: String| TickSweepError::ConfigInvalid {
        section: "sweep".into(),
        key: key.into(),
        reason,
    };
    let technique = match non_empty(adapter, "sweep", "technique") {
        Some(t) => t.parse().map_err(|r| invalid("technique", r))?,
        None => Technique::Grid,
    };
    let wf_technique = match non_empty(adapter, "sweep", "wf_technique") {
        Some(t) => t.parse().map_err(|r| invalid("wf_technique", r))?,
        None => Technique::Grid,
    };
    let score = match non_empty(adapter, "sweep", "score") {
        Some(s) => s.parse().map_err(|r| invalid("score", r))?,
        None => ScoreMetric::default(),
    };
    let seed = count(adapter, "sweep", "seed", 42) as u64;
    let max_samples = non_empty(adapter, "sweep", "max_samples")
        .map(|_| count(adapter, "sweep", "max_samples", usize::MAX));
    let random_time_budget = non_empty(adapter, "sweep", "random_time_budget_secs").map(|_| {
        Duration::from_secs_f64(
            adapter
                .get_double("sweep", "random_time_budget_secs", 0.0)
                .max(0.0),
        )
    });

    let defaults = GeneticConfig::default();
    let genetic = GeneticConfig {
        population: count(adapter, "sweep", "ga_population", defaults.population),
        generations: count(adapter, "sweep", "ga_generations", defaults.generations),
        elite: count(adapter, "sweep", "ga_elite", defaults.elite),
        tournament: count(adapter, "sweep", "ga_tournament", defaults.tournament),
        crossover_rate: adapter.get_double("sweep", "ga_crossover_rate", defaults.crossover_rate),
        mutation_rate: adapter.get_double("sweep", "ga_mutation_rate", defaults.mutation_rate),
        patience: count(adapter, "sweep", "ga_patience", defaults.patience),
        min_remaining_fraction: adapter.get_double(
            "sweep",
            "ga_min_remaining",
            defaults.min_remaining_fraction,
        ),
        seed,
    };

    let wf = WalkForwardConfig::default();
    let validation_days = count(adapter, "sweep", "wf_validation_days", wf.validation_days as usize);
    let walk_forward = WalkForwardConfig {
        train_days: count(adapter, "sweep", "wf_train_days", wf.train_days as usize) as i64,
        validation_days: validation_days as i64,
        step_days: count(adapter, "sweep", "wf_step_days", validation_days) as i64,
        anchored: adapter.get_bool("sweep", "wf_anchored", wf.anchored),
        top_k: count(adapter, "sweep", "wf_top_k", wf.top_k),
    };

    Ok(SweepConfig {
        technique,
        score,
        workers: count(adapter, "sweep", "workers", DispatcherConfig::default().workers).max(1),
        aggregators: count(adapter, "sweep", "aggregators", DEFAULT_AGGREGATORS).max(1),
        batch_size: count(adapter, "sweep", "batch_size", 64).max(1),
        seed,
        shuffle: adapter.get_bool("sweep", "shuffle", false),
        max_samples,
        random_iterations: count(adapter, "sweep", "random_iterations", 100),
        random_time_budget,
        genetic,
        walk_forward,
        wf_technique,
    })
}

/// A fresh search of `kind` over `space`. Walk-forward is not an inner
/// technique; asking for it falls back to grid.
pub fn make_technique(
    kind: Technique,
    space: ParameterSpace,
    cfg: &SweepConfig,
    seed: u64,
) -> Box<dyn SweepTechnique> {
    match kind {
        Technique::Random => Box::new(RandomSearch::new(
            space,
            cfg.batch_size,
            cfg.random_iterations,
            cfg.random_time_budget,
            seed,
        )),
        Technique::Genetic => Box::new(GeneticSearch::new(
            space,
            GeneticConfig {
                seed,
                ..cfg.genetic.clone()
            },
        )),
        Technique::Grid | Technique::WalkForward => Box::new(GridSearch::new(
            space,
            cfg.batch_size,
            cfg.shuffle.then_some(seed),
            cfg.max_samples,
        )),
    }
}

/// Configured instruments that the data source actually has. Missing ones
/// are warned about and dropped; none left is `NoData`.
pub fn resolve_instruments(
    data: &dyn DataPort,
    configured: &[String],
) -> Result<Vec<String>, TickSweepError> {
    let available: HashSet<String> = data.list_instruments()?.into_iter().collect();
    let mut instruments = Vec::with_capacity(configured.len());
    for instrument in configured {
        if available.contains(instrument) {
            instruments.push(instrument.clone());
        } else {
            warn!(instrument = %instrument, "no data file, skipping");
        }
    }
    if instruments.is_empty() {
        return Err(TickSweepError::NoData);
    }
    Ok(instruments)
}

fn print_summary(s: &Summary) {
    eprintln!("Trades:           {}", s.trade_count);
    eprintln!("Win Rate:         {:.1}%", s.win_rate * 100.0);
    eprintln!("Avg Profit:       {:.3}%", s.avg_profit_ratio);
    eprintln!("Total Profit:     {:.2}", s.total_profit_amount);
    eprintln!("Risk Adjusted:    {:.3}", s.risk_adjusted);
    eprintln!("Max Drawdown:     {:.2}", s.max_drawdown);
    eprintln!("Peak Positions:   {}", s.peak_positions);
    eprintln!("Required Capital: {:.0}", s.required_capital);
}

fn run_replay(
    config_path: &Path,
    output: &Path,
    instrument: Option<&str>,
) -> Result<(), TickSweepError> {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = load_config(config_path)?;
    validate_run_config(&adapter)?;

    let mut data_cfg = build_data_config(&adapter)?;
    if let Some(code) = instrument {
        data_cfg.instruments = vec![code.to_string()];
    }
    let replay = build_replay_config(&adapter)?;
    let base = build_variant_params(&adapter)?;
    let rules = build_strategy_rules(&adapter, replay.lookback_ticks)?;
    let sweep = build_sweep_config(&adapter)?;

    let data: Arc<dyn DataPort> = Arc::new(CsvAdapter::new(data_cfg.data_dir.clone()));
    let instruments = resolve_instruments(data.as_ref(), &data_cfg.instruments)?;
    eprintln!(
        "Replaying '{}': {} instruments, {} to {}",
        rules.name,
        instruments.len(),
        data_cfg.start_date,
        data_cfg.end_date
    );

    let space = ParameterSpace::default();
    let candidate = space.combination_at(0);
    let mut dispatcher = LocalDispatcher::spawn(
        data,
        &instruments,
        data_cfg.range(),
        replay,
        CandidateBuilder::new(space, base, rules),
        DispatcherConfig {
            workers: sweep.workers,
            aggregators: 1,
            metric: sweep.score,
            forward_ledgers: true,
            ..Default::default()
        },
        CancelToken::new(),
    )?;
    let mut scored = dispatcher.dispatch(&[candidate], &data_cfg.window())?;
    let result = scored.pop().ok_or_else(|| TickSweepError::Aborted {
        reason: "replay produced no result".into(),
    })?;

    let mut ledger = ResultLedger::new();
    ledger.insert_batch(result.trades);
    let ledger_path = output.join("ledger.csv");
    let positions_path = output.join("positions.csv");
    let trades: Vec<_> = ledger.trades().cloned().collect();
    CsvReportAdapter.write_ledger(&trades, &ledger_path)?;
    CsvReportAdapter.write_position_series(&ledger.position_series(), &positions_path)?;

    eprintln!("\n=== Replay Results ===");
    print_summary(&result.summary);
    eprintln!("\nLedger written to: {}", ledger_path.display());
    eprintln!("Positions written to: {}", positions_path.display());
    Ok(())
}

fn run_sweep(
    config_path: &Path,
    output: &Path,
    technique: Option<Technique>,
    workers: Option<usize>,
) -> Result<(), TickSweepError> {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = load_config(config_path)?;
    validate_run_config(&adapter)?;
    validate_sweep_config(&adapter)?;

    let data_cfg = build_data_config(&adapter)?;
    let replay = build_replay_config(&adapter)?;
    let base = build_variant_params(&adapter)?;
    let rules = build_strategy_rules(&adapter, replay.lookback_ticks)?;
    let mut sweep = build_sweep_config(&adapter)?;
    if let Some(t) = technique {
        sweep.technique = t;
    }
    if let Some(w) = workers {
        sweep.workers = w.max(1);
    }
    let space = ParameterSpace::new(validate_axes(&adapter)?);

    let data: Arc<dyn DataPort> = Arc::new(CsvAdapter::new(data_cfg.data_dir.clone()));
    let instruments = resolve_instruments(data.as_ref(), &data_cfg.instruments)?;
    let builder = CandidateBuilder::new(space.clone(), base, rules);
    let cancel = CancelToken::new();
    let spawn = |forward_ledgers: bool| {
        LocalDispatcher::spawn(
            Arc::clone(&data),
            &instruments,
            data_cfg.range(),
            replay.clone(),
            builder.clone(),
            DispatcherConfig {
                workers: sweep.workers,
                aggregators: sweep.aggregators,
                metric: sweep.score,
                forward_ledgers,
                ..Default::default()
            },
            cancel.clone(),
        )
    };
    info!(
        technique = %sweep.technique,
        combinations = space.total(),
        instruments = instruments.len(),
        workers = sweep.workers,
        "sweep configured"
    );
    eprintln!(
        "Sweeping {} combinations with {} over {} instruments",
        space.total(),
        sweep.technique,
        instruments.len()
    );

    if sweep.technique == Technique::WalkForward {
        let folds = build_folds(data_cfg.start_date, data_cfg.end_date, &sweep.walk_forward)?;
        // Validation gets its own workers and aggregators.
        let mut train = spawn(false)?;
        let mut validation = spawn(true)?;
        let report = run_walk_forward(
            &folds,
            sweep.walk_forward.top_k,
            |fold| {
                make_technique(
                    sweep.wf_technique,
                    space.clone(),
                    &sweep,
                    sweep.seed.wrapping_add(fold.index as u64),
                )
            },
            &mut train,
            &mut validation,
            &cancel,
        )?;

        let path = output.join("walk_forward.csv");
        CsvReportAdapter.write_walk_forward(&space, &report, &path)?;
        eprintln!("\n=== Walk-Forward Results ===");
        for fold in &report.folds {
            eprintln!(
                "  fold {}: train {} best {:.3}, validation {} score {:.3}",
                fold.fold.index,
                fold.fold.train,
                fold.best_train_score(),
                fold.fold.validation,
                fold.validation_score_of_best(),
            );
        }
        eprintln!(
            "Mean train {:.3}, mean validation {:.3}",
            report.mean_train_score(),
            report.mean_validation_score()
        );
        eprintln!("\nResults written to: {}", path.display());
        return Ok(());
    }

    let mut dispatcher = spawn(false)?;
    let mut search = make_technique(sweep.technique, space.clone(), &sweep, sweep.seed);
    let report = ParameterSweepScheduler::run(
        search.as_mut(),
        &mut dispatcher,
        &data_cfg.window(),
        &cancel,
    )?;

    let path = output.join("sweep_results.csv");
    CsvReportAdapter.write_sweep_results(&space, &report.results, &path)?;
    eprintln!(
        "\n=== Sweep Results ({} evaluated in {} batches) ===",
        report.results.len(),
        report.batches
    );
    for (rank, r) in report.top(10).iter().enumerate() {
        eprintln!(
            "  {:>2}. score {:>12.3}  trades {:>5}  {}",
            rank + 1,
            r.score,
            r.summary.trade_count,
            space.describe(&r.candidate)
        );
    }
    eprintln!("\nResults written to: {}", path.display());
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), TickSweepError> {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = load_config(config_path)?;
    if let Err(e) = validate_run_config(&adapter) {
        if matches!(e, TickSweepError::RuleParse(_)) {
            print_rule_context(&adapter);
        }
        return Err(e);
    }
    let sweeping = !adapter.keys("axes").is_empty() || !adapter.keys("sweep").is_empty();
    if sweeping {
        validate_sweep_config(&adapter)?;
    }

    let replay = build_replay_config(&adapter)?;
    let rules_lookback = replay.lookback_ticks;
    let entry = non_empty(&adapter, "strategy", "entry").unwrap_or_default();
    eprintln!("\nEntry Rule:");
    eprintln!("  Parsed: {}", parse_rule(&entry, true, rules_lookback)?);
    eprintln!("  Raw:    {}", entry);
    if let Some(exit) = non_empty(&adapter, "strategy", "exit") {
        eprintln!("\nExit Rule:");
        eprintln!("  Parsed: {}", parse_rule(&exit, false, rules_lookback)?);
        eprintln!("  Raw:    {}", exit);
    }

    let data_cfg = build_data_config(&adapter)?;
    eprintln!("\nData:");
    eprintln!("  dir:         {}", data_cfg.data_dir.display());
    eprintln!("  instruments: {}", data_cfg.instruments.join(", "));
    eprintln!("  range:       {} to {}", data_cfg.start_date, data_cfg.end_date);

    if sweeping {
        let space = ParameterSpace::new(validate_axes(&adapter)?);
        eprintln!("\nAxes ({} combinations):", space.total());
        for axis in space.axes() {
            eprintln!("  {}: {} values", axis.name, axis.len());
        }
    }

    eprintln!("\nConfiguration is valid.");
    Ok(())
}

fn print_rule_context(adapter: &dyn ConfigPort) {
    for key in ["entry", "exit"] {
        let Some(src) = non_empty(adapter, "strategy", key) else {
            continue;
        };
        if let Err(e) = rule_parser::parse(&src) {
            eprintln!("{} rule:\n{}", key, e.display_with_context(&src));
        }
    }
}

fn run_list_instruments(config_path: &Path) -> Result<(), TickSweepError> {
    let adapter = load_config(config_path)?;
    let data_dir = non_empty(&adapter, "data", "data_dir").ok_or_else(|| {
        TickSweepError::ConfigMissing {
            section: "data".into(),
            key: "data_dir".into(),
        }
    })?;
    let instruments = CsvAdapter::new(PathBuf::from(data_dir)).list_instruments()?;
    if instruments.is_empty() {
        eprintln!("No instruments found");
    } else {
        for instrument in &instruments {
            println!("{}", instrument);
        }
        eprintln!("{} instruments found", instruments.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn data_config_with_time_range() {
        let c = config(
            "[data]\ndata_dir = /ticks\ninstruments = AAA, BBB ,\nstart_date = 2024-01-02\nend_date = 2024-01-05\nstart_time = 09:00\n",
        );
        let d = build_data_config(&c).unwrap();
        assert_eq!(d.instruments, vec!["AAA", "BBB"]);
        assert_eq!(d.data_dir, PathBuf::from("/ticks"));
        let range = d.time_range.unwrap();
        assert_eq!(range.start, chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(d.window().days(), 4);
    }

    #[test]
    fn replay_config_defaults_and_overrides() {
        let defaults = build_replay_config(&config("")).unwrap();
        assert_eq!(defaults.market, Market::Equity);
        assert_eq!(defaults.book_depth, BOOK_LEVELS);
        assert_eq!(defaults.lookback_ticks, DEFAULT_LOOKBACK_TICKS);

        let c = config(
            "[replay]\nmarket = crypto\nbook_depth = 2\nday_end_time = 15:10\nforbidden_windows = 09:00-09:05, 12:00-13:00\nblacklist = XXX,YYY\n",
        );
        let r = build_replay_config(&c).unwrap();
        assert_eq!(r.market, Market::Crypto);
        assert_eq!(r.book_depth, 2);
        assert_eq!(r.forbidden_windows.len(), 2);
        assert!(r.is_blacklisted("YYY"));
        assert!(r.day_end_time.is_some());
    }

    #[test]
    fn variant_params_overlay_defaults() {
        let c = config("[variant]\nbuy_order = limit\ntake_profit = 2.5\nsplit_sell_count = 3\n");
        let p = build_variant_params(&c).unwrap();
        assert_eq!(p.buy_order, crate::domain::params::OrderType::Limit);
        assert_eq!(p.take_profit_pct, 2.5);
        assert_eq!(p.split_sell_count, 3);
        assert_eq!(p.sell_order, VariantParams::default().sell_order);
    }

    #[test]
    fn strategy_rules_need_entry() {
        let c = config("[strategy]\nname = Dip\nentry = BELOW(price, AVG_PRICE(5))\nexit = ABOVE(return_pct, 1)\n");
        let rules = build_strategy_rules(&c, 100).unwrap();
        assert_eq!(rules.name, "Dip");
        assert!(rules.exit.is_some());
        assert!(matches!(
            build_strategy_rules(&config("[strategy]\nname = x\n"), 100),
            Err(TickSweepError::ConfigMissing { .. })
        ));
    }

    #[test]
    fn sweep_config_defaults_and_overrides() {
        let d = build_sweep_config(&config("")).unwrap();
        assert_eq!(d.technique, Technique::Grid);
        assert_eq!(d.aggregators, DEFAULT_AGGREGATORS);
        assert_eq!(d.max_samples, None);
        assert_eq!(d.walk_forward, WalkForwardConfig::default());

        let c = config(
            "[sweep]\ntechnique = genetic\nscore = sharpe\nworkers = 3\nseed = 7\nga_population = 12\nwf_validation_days = 4\nmax_samples = 50\nrandom_time_budget_secs = 1.5\n",
        );
        let s = build_sweep_config(&c).unwrap();
        assert_eq!(s.technique, Technique::Genetic);
        assert_eq!(s.score, ScoreMetric::RiskAdjusted);
        assert_eq!(s.workers, 3);
        assert_eq!(s.genetic.population, 12);
        assert_eq!(s.genetic.seed, 7);
        assert_eq!(s.walk_forward.step_days, 4);
        assert_eq!(s.max_samples, Some(50));
        assert_eq!(s.random_time_budget, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn technique_names() {
        assert_eq!("walk-forward".parse::<Technique>().unwrap(), Technique::WalkForward);
        assert_eq!(Technique::WalkForward.to_string(), "walk_forward");
        assert!("annealing".parse::<Technique>().is_err());
        let s = build_sweep_config(&config("")).unwrap();
        let space = ParameterSpace::default();
        assert_eq!(make_technique(Technique::Random, space.clone(), &s, 1).name(), "random");
        assert_eq!(make_technique(Technique::WalkForward, space, &s, 1).name(), "grid");
    }

    #[test]
    fn cli_parses_sweep_override() {
        let cli = Cli::try_parse_from([
            "ticksweep",
            "sweep",
            "--config",
            "a.ini",
            "--technique",
            "random",
            "--workers",
            "2",
        ])
        .unwrap();
        match cli.command {
            Command::Sweep {
                technique, workers, ..
            } => {
                assert_eq!(technique, Some(Technique::Random));
                assert_eq!(workers, Some(2));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
