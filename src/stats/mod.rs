//! Statistics Module
//!
//! Concurrent aggregation of round-trip measurements.
//!
//! - [`series`]: order-independent count/sum/min/max series
//! - [`aggregator`]: the lock-guarded run statistics
//! - [`report`]: immutable snapshots and their formatting

pub mod aggregator;
pub mod report;
pub mod series;

pub use aggregator::{SharedAggregator, StatsAggregator};
pub use report::{ProgressSnapshot, RunReport};
pub use series::{StatisticalSeries, NANOS_TO_MICROS};
