//! Statistical Series
//!
//! Running count/sum/min/max over a stream of integer samples. Updates are
//! associative and commutative: the same multiset of values yields the
//! same series regardless of order, so concurrent writers never need to
//! agree on an ordering.

use std::fmt;

use serde::Serialize;

/// Converts nanosecond ticks to microseconds.
pub const NANOS_TO_MICROS: f64 = 1e-3;

/// A named numeric series with a display unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticalSeries {
    name: &'static str,
    unit: &'static str,
    #[serde(skip)]
    multiplier: f64,
    count: u64,
    sum: u64,
    min: Option<u64>,
    max: Option<u64>,
}

impl StatisticalSeries {
    /// Creates an empty series.
    ///
    /// `multiplier` converts raw values to `unit` when displayed.
    pub fn new(name: &'static str, unit: &'static str, multiplier: f64) -> Self {
        Self {
            name,
            unit,
            multiplier,
            count: 0,
            sum: 0,
            min: None,
            max: None,
        }
    }

    /// Adds one value.
    pub fn update(&mut self, value: u64) {
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    /// Folds another series of the same quantity into this one.
    pub fn merge(&mut self, other: &StatisticalSeries) {
        self.count += other.count;
        self.sum = self.sum.saturating_add(other.sum);
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn unit(&self) -> &'static str {
        self.unit
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// Smallest value, `None` when empty.
    pub fn min(&self) -> Option<u64> {
        self.min
    }

    /// Largest value, `None` when empty.
    pub fn max(&self) -> Option<u64> {
        self.max
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean of the raw values, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum as f64 / self.count as f64)
        }
    }
}

impl fmt::Display for StatisticalSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mean(), self.min, self.max) {
            (Some(mean), Some(min), Some(max)) => write!(
                f,
                "{}: {:.1} {unit} (min: {:.1} {unit}, max: {:.1} {unit})",
                self.name,
                mean * self.multiplier,
                min as f64 * self.multiplier,
                max as f64 * self.multiplier,
                unit = self.unit
            ),
            _ => write!(f, "{}: no data", self.name),
        }
    }
}
