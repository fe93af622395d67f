//! Core domain types and logic: the tick replay engine, its inputs and
//! results, and the parameter sweep techniques.

pub mod book_fill;
pub mod cancel;
pub mod config_validation;
pub mod engine;
pub mod error;
pub mod indicator;
pub mod ledger;
pub mod market;
pub mod metrics;
pub mod params;
pub mod replay;
pub mod rule;
pub mod rule_eval;
pub mod rule_parser;
pub mod split;
pub mod strategy;
pub mod sweep;
pub mod tick;
pub mod trade;
pub mod variant;
