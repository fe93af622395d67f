//! Concurrent evaluation runtime: engine workers and result aggregators on
//! OS threads, connected by crossbeam channels.

pub mod aggregator;
pub mod dispatcher;
pub mod messages;
pub mod worker;
