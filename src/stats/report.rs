//! Run Reports
//!
//! Immutable copies of the aggregator state. Formatting and export happen
//! on these copies, never while the aggregator lock is held.

use std::collections::BTreeMap;
use std::fmt;

use colored::Colorize;
use serde::Serialize;

use crate::monitoring::ResourceSnapshot;
use crate::operation::Phase;

use super::series::StatisticalSeries;

const RULE: &str = "##########################################";

/// Final (or intermediate) state of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub total_samples: u64,
    pub total_errors: u64,
    /// Error counts by classified key
    pub errors: BTreeMap<String, u64>,
    /// One series per round-trip phase, in phase order
    pub phases: Vec<StatisticalSeries>,
    pub work_started_by_unit: StatisticalSeries,
    pub work_done_by_unit: StatisticalSeries,
    pub properly_finished_workers: u64,
    /// Workers that never started an operation
    pub not_working_instances: u64,
    /// Workers whose completed count is below their started count
    pub not_finishing_instances: u64,
    pub run_seconds: f64,
    pub samples_per_second: f64,
    pub init: Option<ResourceSnapshot>,
    pub work: Option<ResourceSnapshot>,
    pub configuration: String,
}

impl RunReport {
    /// Series of one phase.
    pub fn phase(&self, phase: Phase) -> &StatisticalSeries {
        &self.phases[phase.index()]
    }

    /// Count recorded under `key`, 0 when absent.
    pub fn error_count(&self, key: &str) -> u64 {
        self.errors.get(key).copied().unwrap_or(0)
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", RULE)?;
        if self.work.is_some() {
            writeln!(
                f,
                "Total {} samples in {:.1} s, {:.1}/s",
                self.total_samples, self.run_seconds, self.samples_per_second
            )?;
        }
        if let Some(ref init) = self.init {
            writeln!(f, "INIT: {}", init)?;
        }
        if let Some(ref work) = self.work {
            writeln!(f, "WORK: {}", work)?;
        }
        if !self.configuration.is_empty() {
            writeln!(f, "OPTIONS: {}", self.configuration)?;
        }
        writeln!(f)?;
        writeln!(f, "{}", self.work_started_by_unit)?;
        writeln!(f, "{}", self.work_done_by_unit)?;
        writeln!(f, "Properly finished instances: {}", self.properly_finished_workers)?;
        writeln!(
            f,
            "Instances, that in fact have not done any work: {}",
            self.not_working_instances
        )?;
        writeln!(
            f,
            "Instances, that did not finish work (error occurred?): {}",
            self.not_finishing_instances
        )?;
        writeln!(f)?;
        for series in &self.phases {
            writeln!(f, "{}", series)?;
        }
        writeln!(f, "{}", RULE)?;

        if self.total_errors > 0 {
            writeln!(f)?;
            writeln!(f, "{}", "------ ERRORS ------".red().bold())?;
            for (key, count) in &self.errors {
                writeln!(f, "{}: {}", key, count)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Lightweight view used by the progress monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub total_samples: u64,
    pub total_errors: u64,
    pub elapsed_secs: f64,
    pub samples_per_second: f64,
}

#[cfg(test)]
mod tests {
    use super::RunReport;
    use crate::stats::StatsAggregator;

    #[test]
    fn test_empty_report_shows_no_data() {
        let report: RunReport = StatsAggregator::new().snapshot();
        let text = report.to_string();

        assert!(text.contains("01ConnectionCreate: no data"));
        assert!(text.contains("07ConnectionTeardown: no data"));
        assert!(text.contains("WorkStartedByUnit: no data"));
        assert!(text.contains("Properly finished instances: 0"));
        assert!(!text.contains("ERRORS"));
    }

    #[test]
    fn test_report_lists_errors() {
        let mut agg = StatsAggregator::new();
        agg.record_error("[10928] request limit reached");
        agg.record_error("[10928] request limit reached");
        agg.record_error("connection refused");

        let report = agg.snapshot();
        assert_eq!(report.error_count("[10928] request limit reached"), 2);
        assert_eq!(report.error_count("missing"), 0);

        let text = report.to_string();
        assert!(text.contains("ERRORS"));
        assert!(text.contains("[10928] request limit reached: 2"));
        assert!(text.contains("connection refused: 1"));
    }

    #[test]
    fn test_report_json_export() {
        let mut agg = StatsAggregator::new();
        agg.record_phases(&crate::operation::PhaseMeasurement::new([1, 2, 3, 4, 5, 6, 7]));
        let json = agg.snapshot().to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total_samples"], 1);
        assert_eq!(value["phases"][3]["name"], "04ExecuteFirstRow");
        assert_eq!(value["phases"][3]["sum"], 4);
    }
}
