//! Configuration validation.
//!
//! Every section is checked before anything runs, so a bad key fails fast
//! with `ConfigMissing`/`ConfigInvalid` instead of part-way through a sweep.

use chrono::NaiveDate;

use crate::domain::error::TickSweepError;
use crate::domain::market::Market;
use crate::domain::metrics::ScoreMetric;
use crate::domain::params::{OrderType, VariantParams};
use crate::domain::replay::{parse_time, TimeWindow};
use crate::domain::rule::Rule;
use crate::domain::rule_parser;
use crate::domain::split::SplitMethod;
use crate::domain::sweep::Axis;
use crate::domain::tick::BOOK_LEVELS;
use crate::ports::config_port::ConfigPort;

pub const TECHNIQUES: &[&str] = &["grid", "random", "genetic", "walk_forward"];

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TickSweepError {
    TickSweepError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> TickSweepError {
    TickSweepError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn non_empty(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Optional numeric key. Present but non-numeric is an error rather than
/// silently falling back to the default.
fn number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, TickSweepError> {
    match non_empty(config, section, key) {
        None => Ok(None),
        Some(s) => s
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(section, key, format!("'{}' is not a number", s))),
    }
}

fn at_least(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    min: f64,
) -> Result<(), TickSweepError> {
    match number(config, section, key)? {
        Some(v) if v < min => Err(invalid(section, key, format!("{} must be at least {}", key, min))),
        _ => Ok(()),
    }
}

fn fraction(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), TickSweepError> {
    match number(config, section, key)? {
        Some(v) if !(0.0..=1.0).contains(&v) => {
            Err(invalid(section, key, format!("{} must be between 0 and 1", key)))
        }
        _ => Ok(()),
    }
}

pub fn parse_date(config: &dyn ConfigPort, section: &str, key: &str) -> Result<NaiveDate, TickSweepError> {
    let s = non_empty(config, section, key).ok_or_else(|| missing(section, key))?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|_| invalid(section, key, format!("invalid {} format, expected YYYY-MM-DD", key)))
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), TickSweepError> {
    if non_empty(config, "data", "data_dir").is_none() {
        return Err(missing("data", "data_dir"));
    }
    let instruments = non_empty(config, "data", "instruments").unwrap_or_default();
    if !instruments.split(',').any(|s| !s.trim().is_empty()) {
        return Err(missing("data", "instruments"));
    }

    let start = parse_date(config, "data", "start_date")?;
    let end = parse_date(config, "data", "end_date")?;
    if start > end {
        return Err(invalid("data", "start_date", "start_date must not be after end_date"));
    }

    let mut times = Vec::new();
    for key in ["start_time", "end_time"] {
        if let Some(s) = non_empty(config, "data", key) {
            times.push(parse_time(&s).map_err(|reason| invalid("data", key, reason))?);
        }
    }
    if let [start_time, end_time] = times.as_slice() {
        if start_time >= end_time {
            return Err(invalid("data", "start_time", "start_time must be before end_time"));
        }
    }
    Ok(())
}

pub fn validate_replay_config(config: &dyn ConfigPort) -> Result<(), TickSweepError> {
    if let Some(m) = non_empty(config, "replay", "market") {
        m.parse::<Market>()
            .map_err(|reason| invalid("replay", "market", reason))?;
    }
    if let Some(depth) = number(config, "replay", "book_depth")? {
        if depth < 1.0 || depth > BOOK_LEVELS as f64 {
            return Err(invalid(
                "replay",
                "book_depth",
                format!("book_depth must be between 1 and {}", BOOK_LEVELS),
            ));
        }
    }
    at_least(config, "replay", "progress_interval", 1.0)?;
    at_least(config, "replay", "lookback_ticks", 1.0)?;
    at_least(config, "replay", "price_floor", 0.0)?;
    if let Some(s) = non_empty(config, "replay", "day_end_time") {
        parse_time(&s).map_err(|reason| invalid("replay", "day_end_time", reason))?;
    }
    if let Some(s) = non_empty(config, "replay", "forbidden_windows") {
        for w in s.split(',').filter(|w| !w.trim().is_empty()) {
            w.parse::<TimeWindow>()
                .map_err(|reason| invalid("replay", "forbidden_windows", reason))?;
        }
    }
    Ok(())
}

/// Numeric value of a `[variant]` entry. Order types and split methods
/// also accept their names.
pub fn parse_param_value(name: &str, raw: &str) -> Result<f64, String> {
    match name {
        "buy_order" | "sell_order" => raw.parse::<OrderType>().map(|t| match t {
            OrderType::Market => 0.0,
            OrderType::Limit => 1.0,
        }),
        "split_buy_method" | "split_sell_method" => {
            raw.parse::<SplitMethod>().map(|m| f64::from(m.code()))
        }
        _ => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", raw.trim())),
    }
}

/// Range check for one parameter value, whether it comes from `[variant]`
/// or from a sweep axis.
pub fn check_param(name: &str, value: f64) -> Result<(), String> {
    let ok = match name {
        "buy_amount" => value > 0.0,
        "split_buy_count" | "split_sell_count" => value >= 1.0,
        "buy_offset_ticks" | "sell_offset_ticks" => true,
        _ => value >= 0.0,
    };
    if !ok {
        let bound = match name {
            "buy_amount" => "positive",
            "split_buy_count" | "split_sell_count" => "at least 1",
            _ => "non-negative",
        };
        return Err(format!("{} must be {}", name, bound));
    }
    VariantParams::default().set(name, value)
}

pub fn validate_variant_config(config: &dyn ConfigPort) -> Result<(), TickSweepError> {
    for key in config.keys("variant") {
        if !VariantParams::is_known(&key) {
            return Err(invalid("variant", &key, format!("unknown parameter '{}'", key)));
        }
        let Some(raw) = non_empty(config, "variant", &key) else {
            continue;
        };
        parse_param_value(&key, &raw)
            .and_then(|v| check_param(&key, v))
            .map_err(|reason| invalid("variant", &key, reason))?;
    }
    Ok(())
}

/// Parse one rule expression, checking it only reads what its role allows.
pub fn parse_rule(source: &str, is_entry: bool, lookback_ticks: usize) -> Result<Rule, TickSweepError> {
    let rule = rule_parser::parse(source)?;
    if is_entry && rule.uses_position() {
        return Err(TickSweepError::RuleInvalid {
            reason: "entry rule reads position fields (return_pct, hold_secs)".to_string(),
        });
    }
    if rule.lookback() > lookback_ticks {
        return Err(TickSweepError::RuleInvalid {
            reason: format!(
                "rule needs {} ticks of history but lookback_ticks is {}",
                rule.lookback(),
                lookback_ticks
            ),
        });
    }
    Ok(rule)
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), TickSweepError> {
    let lookback = number(config, "replay", "lookback_ticks")?
        .map_or(crate::domain::replay::DEFAULT_LOOKBACK_TICKS, |v| v.max(1.0) as usize);
    let entry = non_empty(config, "strategy", "entry").ok_or_else(|| missing("strategy", "entry"))?;
    parse_rule(&entry, true, lookback)?;
    if let Some(exit) = non_empty(config, "strategy", "exit") {
        parse_rule(&exit, false, lookback)?;
    }
    Ok(())
}

pub fn validate_axes(config: &dyn ConfigPort) -> Result<Vec<Axis>, TickSweepError> {
    let mut axes = Vec::new();
    for key in config.keys("axes") {
        if !VariantParams::is_known(&key) {
            return Err(invalid("axes", &key, format!("unknown parameter '{}'", key)));
        }
        let raw = non_empty(config, "axes", &key).ok_or_else(|| missing("axes", &key))?;
        let axis = Axis::parse(&key, &raw).map_err(|reason| invalid("axes", &key, reason))?;
        for &v in &axis.values {
            check_param(&key, v).map_err(|reason| invalid("axes", &key, reason))?;
        }
        axes.push(axis);
    }
    Ok(axes)
}

pub fn validate_sweep_config(config: &dyn ConfigPort) -> Result<(), TickSweepError> {
    let technique = non_empty(config, "sweep", "technique").unwrap_or_else(|| "grid".to_string());
    if !TECHNIQUES.contains(&technique.as_str()) {
        return Err(invalid(
            "sweep",
            "technique",
            format!("unknown technique '{}', expected one of {}", technique, TECHNIQUES.join(", ")),
        ));
    }
    if let Some(s) = non_empty(config, "sweep", "score") {
        s.parse::<ScoreMetric>()
            .map_err(|reason| invalid("sweep", "score", reason))?;
    }
    for key in ["workers", "aggregators", "batch_size", "max_samples", "random_iterations"] {
        at_least(config, "sweep", key, 1.0)?;
    }
    at_least(config, "sweep", "random_time_budget_secs", 0.0)?;

    for key in ["ga_population", "ga_generations", "ga_tournament", "ga_patience"] {
        at_least(config, "sweep", key, 1.0)?;
    }
    at_least(config, "sweep", "ga_elite", 0.0)?;
    for key in ["ga_crossover_rate", "ga_mutation_rate", "ga_min_remaining"] {
        fraction(config, "sweep", key)?;
    }
    let population = number(config, "sweep", "ga_population")?.unwrap_or(20.0);
    if number(config, "sweep", "ga_elite")?.is_some_and(|e| e >= population) {
        return Err(invalid("sweep", "ga_elite", "ga_elite must be below ga_population"));
    }

    for key in ["wf_train_days", "wf_validation_days", "wf_step_days", "wf_top_k"] {
        at_least(config, "sweep", key, 1.0)?;
    }
    if let Some(inner) = non_empty(config, "sweep", "wf_technique") {
        if !matches!(inner.as_str(), "grid" | "random" | "genetic") {
            return Err(invalid(
                "sweep",
                "wf_technique",
                format!("'{}' cannot run inside walk-forward", inner),
            ));
        }
    }
    let validation_days = number(config, "sweep", "wf_validation_days")?.unwrap_or(5.0);
    let step_days = number(config, "sweep", "wf_step_days")?.unwrap_or(validation_days);
    if step_days < validation_days {
        return Err(invalid(
            "sweep",
            "wf_step_days",
            "wf_step_days must be at least wf_validation_days",
        ));
    }

    validate_axes(config)?;
    Ok(())
}

/// Everything a plain replay needs.
pub fn validate_run_config(config: &dyn ConfigPort) -> Result<(), TickSweepError> {
    validate_data_config(config)?;
    validate_replay_config(config)?;
    validate_variant_config(config)?;
    validate_strategy_config(config)?;
    Ok(())
}
