//! ticksweep: tick-replay strategy backtester and parallel parameter sweeper.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], and the threaded evaluation
//! runtime in [`runtime`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
pub mod runtime;
