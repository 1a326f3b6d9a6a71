//! Statistics Aggregator
//!
//! The single run-scoped mutable object. Workers, the controller and the
//! progress monitor all reach it through [`SharedAggregator`], which guards
//! the whole state with one coarse mutex: a lock acquisition is negligible
//! next to a network round trip, and every update is order-independent, so
//! nothing finer-grained is needed for correctness.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::warn;

use crate::monitoring::{ResourceSampler, ResourceSnapshot};
use crate::operation::{Phase, PhaseMeasurement, PHASE_COUNT};

use super::report::{ProgressSnapshot, RunReport};
use super::series::{StatisticalSeries, NANOS_TO_MICROS};

/// Resettable stopwatch measuring init and run time.
#[derive(Debug, Default)]
struct Stopwatch {
    started: Option<Instant>,
    accumulated: Duration,
}

impl Stopwatch {
    fn restart(&mut self) {
        self.accumulated = Duration::ZERO;
        self.started = Some(Instant::now());
    }

    fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.accumulated += started.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        self.accumulated + self.started.map_or(Duration::ZERO, |s| s.elapsed())
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Accumulated statistics of one run.
#[derive(Debug)]
pub struct StatsAggregator {
    phases: [StatisticalSeries; PHASE_COUNT],
    work_started_by_unit: StatisticalSeries,
    work_done_by_unit: StatisticalSeries,
    total_samples: u64,
    total_errors: u64,
    errors: BTreeMap<String, u64>,
    properly_finished_workers: u64,
    not_working_instances: u64,
    not_finishing_instances: u64,
    stopwatch: Stopwatch,
    init: Option<ResourceSnapshot>,
    before_stop: Option<ResourceSnapshot>,
    configuration: String,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            phases: Phase::ALL
                .map(|phase| StatisticalSeries::new(phase.series_name(), "μs", NANOS_TO_MICROS)),
            work_started_by_unit: StatisticalSeries::new("WorkStartedByUnit", "ops", 1.0),
            work_done_by_unit: StatisticalSeries::new("WorkDoneByUnit", "ops", 1.0),
            total_samples: 0,
            total_errors: 0,
            errors: BTreeMap::new(),
            properly_finished_workers: 0,
            not_working_instances: 0,
            not_finishing_instances: 0,
            stopwatch: Stopwatch::default(),
            init: None,
            before_stop: None,
            configuration: String::new(),
        }
    }

    /// Sets the configuration summary printed with the report.
    pub fn set_configuration(&mut self, summary: impl Into<String>) {
        self.configuration = summary.into();
    }

    /// Adds one value to a phase series.
    pub fn update_phase(&mut self, phase: Phase, ticks: u64) {
        self.phases[phase.index()].update(ticks);
    }

    pub fn record_sample(&mut self) {
        self.total_samples += 1;
    }

    /// Records all seven phases of a successful round trip and counts the
    /// sample.
    pub fn record_phases(&mut self, measurement: &PhaseMeasurement) {
        for phase in Phase::ALL {
            self.update_phase(phase, measurement.get(phase));
        }
        self.record_sample();
    }

    /// Counts one failed round trip under its classified key.
    pub fn record_error(&mut self, key: &str) {
        self.total_errors += 1;
        match self.errors.get_mut(key) {
            Some(count) => *count += 1,
            None => {
                self.errors.insert(key.to_string(), 1);
            }
        }
    }

    /// Folds in the counters a worker publishes when it exits.
    pub fn record_worker_outcome(&mut self, started: u64, completed: u64) {
        debug_assert!(completed <= started, "worker completed more than it started");
        self.properly_finished_workers += 1;
        if started > 0 {
            self.work_started_by_unit.update(started);
        } else {
            self.not_working_instances += 1;
        }
        self.work_done_by_unit.update(completed);
        if completed != started {
            self.not_finishing_instances += 1;
        }
    }

    pub fn mark_init_started(&mut self) {
        self.stopwatch.restart();
    }

    /// Snapshots process resources after init.
    ///
    /// With `keep_running` false the clock stops here; single-pass runs do
    /// their work during init.
    pub fn mark_init_finished(&mut self, keep_running: bool) {
        self.init = sample_or_warn(self.stopwatch.elapsed_ms(), 0.0);
        if !keep_running {
            self.stopwatch.stop();
        }
    }

    pub fn mark_run_started(&mut self) {
        self.stopwatch.restart();
    }

    /// Stops the clock and snapshots process resources for the work phase.
    ///
    /// With `ignore_init_cpu` the CPU time spent during init is excluded.
    pub fn capture_before_stop(&mut self, ignore_init_cpu: bool) {
        self.stopwatch.stop();
        let excluded = match (&self.init, ignore_init_cpu) {
            (Some(init), true) => init.cpu_seconds,
            _ => 0.0,
        };
        self.before_stop = sample_or_warn(self.stopwatch.elapsed_ms(), excluded);
    }

    pub fn mark_run_stopped(&mut self) {
        self.stopwatch.stop();
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors
    }

    pub fn elapsed(&self) -> Duration {
        self.stopwatch.elapsed()
    }

    pub fn samples_per_second(&self) -> f64 {
        let ms = self.stopwatch.elapsed_ms();
        if ms > 0 {
            self.total_samples as f64 * 1000.0 / ms as f64
        } else {
            0.0
        }
    }

    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_samples: self.total_samples,
            total_errors: self.total_errors,
            elapsed_secs: self.elapsed().as_secs_f64(),
            samples_per_second: self.samples_per_second(),
        }
    }

    /// Copies the full state into an owned report.
    pub fn snapshot(&self) -> RunReport {
        RunReport {
            total_samples: self.total_samples,
            total_errors: self.total_errors,
            errors: self.errors.clone(),
            phases: self.phases.to_vec(),
            work_started_by_unit: self.work_started_by_unit.clone(),
            work_done_by_unit: self.work_done_by_unit.clone(),
            properly_finished_workers: self.properly_finished_workers,
            not_working_instances: self.not_working_instances,
            not_finishing_instances: self.not_finishing_instances,
            run_seconds: self
                .before_stop
                .as_ref()
                .map_or_else(|| self.elapsed().as_secs_f64(), |s| s.elapsed_secs()),
            samples_per_second: self.samples_per_second(),
            init: self.init.clone(),
            work: self.before_stop.clone(),
            configuration: self.configuration.clone(),
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_or_warn(elapsed_ms: u64, excluded_cpu_secs: f64) -> Option<ResourceSnapshot> {
    match ResourceSampler::sample(elapsed_ms, excluded_cpu_secs) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!("Resource sample skipped: {}", e);
            None
        }
    }
}

/// Cloneable handle to the run's aggregator.
///
/// Every method takes the lock exactly once, so compound updates such as
/// [`SharedAggregator::record_success`] are never observed half-applied.
#[derive(Debug, Clone, Default)]
pub struct SharedAggregator {
    inner: Arc<Mutex<StatsAggregator>>,
}

impl SharedAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the aggregator. A panic in another holder does not make the
    /// counters unusable, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, StatsAggregator> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_success(&self, measurement: &PhaseMeasurement) {
        self.lock().record_phases(measurement);
    }

    pub fn record_error(&self, key: &str) {
        self.lock().record_error(key);
    }

    pub fn record_worker_outcome(&self, started: u64, completed: u64) {
        self.lock().record_worker_outcome(started, completed);
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.lock().progress()
    }

    pub fn snapshot(&self) -> RunReport {
        self.lock().snapshot()
    }
}
