//! Run Controller
//!
//! Drives one run through its lifecycle:
//!
//! ```text
//! Created -> Initializing -> Ready -> Running -> Stopping -> Stopped
//! ```
//!
//! Transitions only move forward. Workers are spawned during
//! initialization and park on the start signal; `start` releases them,
//! `request_stop` asks them to finish their current iteration, and
//! `await_drained` waits for every worker and observer before the final
//! report can be taken.
//!
//! The controller owns a multi-threaded tokio runtime used by the
//! cooperative workers, the progress monitor and the probe. Its methods
//! block, so they must be called from outside that runtime.

use std::any::Any;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::runtime::{Builder, Runtime};

use crate::config::{validate_config, ExecutionStrategy, RunConfiguration, RunMode};
use crate::error::{LifecycleError, Result, RunError};
use crate::monitoring::{MonitorLoop, ProbeConnector, ProbeMonitor, ProbeSettings, TcpProbeConnector};
use crate::operation::Operation;
use crate::output::ResultLog;
use crate::stats::{RunReport, SharedAggregator};

use super::signals::RunSignals;
use super::worker::{Worker, WorkerContext, WorkerOutcome};

/// Interval between liveness checks while draining.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initializing,
    Ready,
    Running,
    Stopping,
    Stopped,
}

/// Spawned workers, by strategy.
enum WorkerSet {
    Threads(Vec<thread::JoinHandle<WorkerOutcome>>),
    Tasks(Vec<tokio::task::JoinHandle<WorkerOutcome>>),
}

impl WorkerSet {
    fn live(&self) -> usize {
        match self {
            Self::Threads(handles) => handles.iter().filter(|h| !h.is_finished()).count(),
            Self::Tasks(handles) => handles.iter().filter(|h| !h.is_finished()).count(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Threads(handles) => handles.len(),
            Self::Tasks(handles) => handles.len(),
        }
    }
}

/// Entry point for creating runs.
pub struct RunController;

impl RunController {
    /// Initializes a run, probing over TCP when the configuration asks for
    /// it.
    pub fn initialize<O: Operation>(config: RunConfiguration, operation: O) -> Result<RunHandle> {
        Self::initialize_with_probe(config, operation, TcpProbeConnector, ProbeSettings::default())
    }

    /// Initializes a run with a custom probe connector.
    ///
    /// Validates the configuration, builds the runtime, opens the result
    /// log and spawns every worker. On success the run is `Ready`.
    pub fn initialize_with_probe<O: Operation, C: ProbeConnector>(
        config: RunConfiguration,
        operation: O,
        connector: C,
        probe_settings: ProbeSettings,
    ) -> Result<RunHandle> {
        let mut state = LifecycleState::Created;
        validate_config(&config)?;
        state = advance(state, LifecycleState::Initializing);

        let runtime = build_runtime(&config)?;
        let result_log = match &config.result_log {
            Some(path) => Some(ResultLog::open(path)?),
            None => None,
        };

        let config = Arc::new(config);
        let signals = Arc::new(RunSignals::new());
        let aggregator = SharedAggregator::new();
        {
            let mut stats = aggregator.lock();
            stats.set_configuration(config.summary());
            stats.mark_init_started();
        }

        if config.single_pass {
            signals.set_start();
        }

        info!(
            "Creating {} {} ({})...",
            config.workers,
            config.strategy.unit_plural(),
            config.operation
        );
        let init_started = Instant::now();
        let ctx = WorkerContext {
            config: Arc::clone(&config),
            operation: Arc::new(operation),
            signals: Arc::clone(&signals),
            aggregator: aggregator.clone(),
            recorder: result_log.as_ref().and_then(ResultLog::recorder),
        };
        let workers = spawn_workers(&runtime, &ctx, config.workers)?;
        drop(ctx);

        aggregator.lock().mark_init_finished(!config.single_pass);
        let init_elapsed = init_started.elapsed();
        if let Some(recorder) = result_log.as_ref().and_then(ResultLog::recorder) {
            recorder.init_completed(init_elapsed, 0);
        }
        info!(
            "Initialized {} {} in {:.1} s",
            workers.len(),
            config.strategy.unit_plural(),
            init_elapsed.as_secs_f64()
        );

        let probe = if config.probe {
            ProbeMonitor::start(runtime.handle(), connector, &config.target, probe_settings)
        } else {
            ProbeMonitor::disabled()
        };

        Ok(RunHandle {
            state: advance(state, LifecycleState::Ready),
            config,
            runtime,
            signals,
            aggregator,
            workers: Some(workers),
            monitor: None,
            probe,
            result_log,
        })
    }
}

fn advance(from: LifecycleState, to: LifecycleState) -> LifecycleState {
    debug!("Run: {:?} -> {:?}", from, to);
    to
}

fn build_runtime(config: &RunConfiguration) -> io::Result<Runtime> {
    let mut builder = Builder::new_multi_thread();
    builder.enable_all().thread_name("dbstress-carrier");
    if let Some(threads) = config.carrier_threads {
        builder.worker_threads(threads);
    }
    if let Some(threads) = config.blocking_threads {
        builder.max_blocking_threads(threads);
    }
    builder.build()
}

fn spawn_workers<O: Operation>(
    runtime: &Runtime,
    ctx: &WorkerContext<O>,
    count: usize,
) -> io::Result<WorkerSet> {
    match ctx.config.strategy {
        ExecutionStrategy::Preemptible => {
            let handles = spawn_threads(count, &ctx.signals, |id| {
                let worker = Worker::new(id as u64, ctx.clone());
                thread::Builder::new()
                    .name(format!("worker-{}", id))
                    .spawn(move || worker.run_blocking())
            })?;
            Ok(WorkerSet::Threads(handles))
        }
        ExecutionStrategy::Cooperative => {
            let handles = (0..count)
                .map(|id| runtime.spawn(Worker::new(id as u64, ctx.clone()).run_cooperative()))
                .collect();
            Ok(WorkerSet::Tasks(handles))
        }
    }
}

/// Spawns `count` worker threads.
///
/// When a spawn fails, the threads already running are stopped and joined
/// before the error is returned, so none stays parked on the start signal.
fn spawn_threads<F>(
    count: usize,
    signals: &RunSignals,
    mut spawn_one: F,
) -> io::Result<Vec<thread::JoinHandle<WorkerOutcome>>>
where
    F: FnMut(usize) -> io::Result<thread::JoinHandle<WorkerOutcome>>,
{
    let mut handles = Vec::with_capacity(count);
    for id in 0..count {
        match spawn_one(id) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                error!("Failed to spawn worker {} of {}: {}", id + 1, count, e);
                signals.set_stop();
                for handle in handles {
                    let _ = handle.join();
                }
                return Err(e);
            }
        }
    }
    Ok(handles)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// An initialized run.
pub struct RunHandle {
    state: LifecycleState,
    config: Arc<RunConfiguration>,
    runtime: Runtime,
    signals: Arc<RunSignals>,
    aggregator: SharedAggregator,
    workers: Option<WorkerSet>,
    monitor: Option<MonitorLoop>,
    probe: ProbeMonitor,
    result_log: Option<ResultLog>,
}

impl RunHandle {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Run id allocated in the result log, if one is open.
    pub fn run_id(&self) -> Option<u64> {
        self.result_log.as_ref().map(ResultLog::run_id)
    }

    fn misuse(&self, operation: &'static str) -> RunError {
        LifecycleError {
            operation,
            state: self.state,
        }
        .into()
    }

    fn transition(&mut self, to: LifecycleState) {
        self.state = advance(self.state, to);
    }

    /// Releases the workers. Only valid when `Ready`.
    pub fn start(&mut self) -> Result<()> {
        if self.state != LifecycleState::Ready {
            return Err(self.misuse("start"));
        }

        // Single-pass workers started during init; keep the init clock.
        if !self.config.single_pass {
            self.aggregator.lock().mark_run_started();
        }
        self.signals.set_start();
        self.monitor = Some(MonitorLoop::spawn(
            self.runtime.handle(),
            self.aggregator.clone(),
            self.config.monitor_interval(),
        ));
        self.transition(LifecycleState::Running);
        info!("Run started");
        Ok(())
    }

    /// Asks every worker to stop after its current iteration.
    ///
    /// Idempotent once stopping; an error before the run is running.
    pub fn request_stop(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Running => {}
            LifecycleState::Stopping | LifecycleState::Stopped => return Ok(()),
            _ => return Err(self.misuse("request stop")),
        }

        self.aggregator
            .lock()
            .capture_before_stop(!self.config.single_pass);
        self.signals.set_stop();
        self.transition(LifecycleState::Stopping);
        info!("Stopping...");
        Ok(())
    }

    /// Waits until every worker and observer has finished.
    ///
    /// Valid while `Stopping`, or while `Running` in single-pass mode where
    /// the workers end on their own.
    pub fn await_drained(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Stopping => {}
            LifecycleState::Stopped => return Ok(()),
            LifecycleState::Running if self.config.single_pass => {
                self.wait_for_workers("finish");
                self.request_stop()?;
            }
            _ => return Err(self.misuse("await drain")),
        }

        let drain_started = Instant::now();
        self.wait_for_workers("stop");
        let panicked = self.join_workers();
        self.aggregator.lock().mark_run_stopped();

        if let Some(monitor) = self.monitor.as_mut() {
            monitor.stop(self.runtime.handle());
        }
        let probe_stats = self.probe.stop(self.runtime.handle());
        if probe_stats.connections > 0 || probe_stats.failures > 0 {
            info!(
                "Probe: {} samples over {} connections ({} failures)",
                probe_stats.samples, probe_stats.connections, probe_stats.failures
            );
        }

        self.transition(LifecycleState::Stopped);
        info!(
            "All {} finished after {:.1} s",
            self.config.strategy.unit_plural(),
            drain_started.elapsed().as_secs_f64()
        );

        if let Some(log) = self.result_log.as_mut() {
            let rows = log.close()?;
            info!("Result log: {} rows written for run {}", rows, log.run_id());
        }

        match panicked {
            Some(message) => Err(RunError::Panicked(message)),
            None => Ok(()),
        }
    }

    /// Polls until no worker is alive, logging stragglers.
    fn wait_for_workers(&self, verb: &str) {
        let Some(workers) = self.workers.as_ref() else {
            return;
        };
        let mut last_reported = usize::MAX;
        loop {
            let live = workers.live();
            if live == 0 {
                return;
            }
            if live != last_reported {
                info!(
                    "Waiting for {} {} to {}...",
                    live,
                    self.config.strategy.unit_plural(),
                    verb
                );
                last_reported = live;
            }
            thread::sleep(DRAIN_POLL_INTERVAL);
        }
    }

    /// Joins every worker. Returns the first panic, if any.
    fn join_workers(&mut self) -> Option<String> {
        let mut panicked = None;
        match self.workers.take() {
            Some(WorkerSet::Threads(handles)) => {
                for handle in handles {
                    let name = handle.thread().name().unwrap_or("worker").to_string();
                    if let Err(payload) = handle.join() {
                        let message = panic_message(payload.as_ref());
                        error!("{} panicked: {}", name, message);
                        panicked.get_or_insert(name);
                    }
                }
            }
            Some(WorkerSet::Tasks(handles)) => {
                self.runtime.block_on(async {
                    for handle in handles {
                        if let Err(e) = handle.await {
                            error!("Worker task failed: {}", e);
                            panicked.get_or_insert_with(|| "worker task".to_string());
                        }
                    }
                });
            }
            None => {}
        }
        panicked
    }

    /// Returns the final report. Only valid when `Stopped`.
    pub fn final_report(&self) -> Result<RunReport> {
        if self.state != LifecycleState::Stopped {
            return Err(self.misuse("take the final report"));
        }
        Ok(self.aggregator.snapshot())
    }

    /// Runs to completion according to the configured mode.
    pub fn execute(&mut self) -> Result<RunReport> {
        self.start()?;
        match self.config.mode() {
            RunMode::Duration(duration) => {
                info!("Running for {} s...", duration.as_secs());
                thread::sleep(duration);
                self.request_stop()?;
            }
            RunMode::Interactive => {
                info!("Press ENTER to stop...");
                let mut line = String::new();
                io::stdin().read_line(&mut line)?;
                self.request_stop()?;
            }
            RunMode::SinglePass => {}
        }
        self.await_drained()?;
        self.final_report()
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if self.state != LifecycleState::Stopped {
            warn!("Run dropped while {:?}; signalling workers to stop", self.state);
            self.signals.set_stop();
            // Release parked workers so they observe the stop.
            self.signals.set_start();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationKind;
    use crate::error::OperationError;
    use crate::operation::{PhaseMeasurement, SimulatedOperation};
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::tempdir;

    const STRATEGIES: [ExecutionStrategy; 2] =
        [ExecutionStrategy::Preemptible, ExecutionStrategy::Cooperative];

    fn simulated() -> SimulatedOperation {
        SimulatedOperation::new(Duration::from_secs(1)).with_fast_latency(Duration::from_millis(1))
    }

    fn base_config(strategy: ExecutionStrategy, workers: usize) -> RunConfiguration {
        let mut config = RunConfiguration::new()
            .with_strategy(strategy)
            .with_workers(workers)
            .with_slow_delay_secs(1);
        config.carrier_threads = Some(2);
        config
    }

    struct FailingOperation {
        calls: AtomicU64,
    }

    impl FailingOperation {
        fn fail(&self) -> std::result::Result<PhaseMeasurement, OperationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(OperationError::Driver {
                code: 10928,
                message: "request limit reached".to_string(),
            })
        }
    }

    impl Operation for FailingOperation {
        fn execute(&self, _target: &str, _kind: OperationKind) -> std::result::Result<PhaseMeasurement, OperationError> {
            self.fail()
        }

        async fn execute_async(
            &self,
            _target: &str,
            _kind: OperationKind,
        ) -> std::result::Result<PhaseMeasurement, OperationError> {
            self.fail()
        }
    }

    #[test]
    fn test_single_pass_every_worker_runs_once() {
        for strategy in STRATEGIES {
            let config = base_config(strategy, 4).with_single_pass();
            let mut run = RunController::initialize(config, simulated()).unwrap();
            assert_eq!(run.state(), LifecycleState::Ready);

            let report = run.execute().unwrap();
            assert_eq!(run.state(), LifecycleState::Stopped);
            assert_eq!(report.total_samples, 4, "{:?}", strategy);
            assert_eq!(report.total_errors, 0);
            assert_eq!(report.properly_finished_workers, 4);
            assert_eq!(report.not_finishing_instances, 0);
            assert_eq!(report.not_working_instances, 0);
            assert_eq!(report.work_done_by_unit.sum(), 4);
            assert_eq!(report.phases.len(), 7);
            for series in &report.phases {
                assert_eq!(series.count(), 4, "{}", series.name());
            }
        }
    }

    #[test]
    fn test_errors_are_counted_per_key() {
        for strategy in STRATEGIES {
            let config = base_config(strategy, 2).with_single_pass();
            let operation = FailingOperation {
                calls: AtomicU64::new(0),
            };
            let mut run = RunController::initialize(config, operation).unwrap();
            let report = run.execute().unwrap();

            assert_eq!(report.total_errors, 2, "{:?}", strategy);
            assert_eq!(report.error_count("[10928] request limit reached"), 2);
            assert_eq!(report.total_samples, 0);
            assert_eq!(report.not_finishing_instances, 2);
            assert!(report.phases.iter().all(|series| series.is_empty()));
        }
    }

    #[test]
    fn test_unknown_kind_stops_all_workers_and_logs_once() {
        for strategy in STRATEGIES {
            let config = base_config(strategy, 8)
                .with_single_pass()
                .with_operation(OperationKind::Unknown(7));
            let mut run = RunController::initialize(config, simulated()).unwrap();
            let report = run.execute().unwrap();

            assert_eq!(report.total_samples, 0);
            assert_eq!(report.properly_finished_workers, 8);
            assert_eq!(report.not_working_instances, 8);
            // Someone already claimed the one-shot log.
            assert!(!run.signals.claim_kind_error());
        }
    }

    #[test]
    fn test_drain_waits_for_in_flight_operations() {
        for strategy in STRATEGIES {
            let config = base_config(strategy, 3).with_operation(OperationKind::SlowSimulation);
            let mut run = RunController::initialize(config, simulated()).unwrap();
            run.start().unwrap();
            thread::sleep(Duration::from_millis(100));
            run.request_stop().unwrap();

            let drain_started = Instant::now();
            run.await_drained().unwrap();
            // Each worker was mid-way through a one second operation.
            assert!(drain_started.elapsed() >= Duration::from_millis(500));

            let report = run.final_report().unwrap();
            assert_eq!(report.total_samples, 3, "{:?}", strategy);
            assert_eq!(report.not_finishing_instances, 0);
            assert_eq!(report.work_started_by_unit.sum(), 3);
        }
    }

    #[test]
    fn test_duration_run_collects_samples() {
        for strategy in STRATEGIES {
            let config = base_config(strategy, 2).with_duration_secs(1);
            let mut run = RunController::initialize(config, simulated()).unwrap();
            let report = run.execute().unwrap();

            assert!(report.total_samples > 10, "{:?}: {}", strategy, report.total_samples);
            assert!(report.run_seconds >= 1.0);
            assert!(report.samples_per_second > 0.0);
            assert_eq!(report.properly_finished_workers, 2);
        }
    }

    #[test]
    fn test_lifecycle_misuse_is_rejected() {
        let config = base_config(ExecutionStrategy::Cooperative, 1);
        let mut run = RunController::initialize(config, simulated()).unwrap();

        assert!(matches!(run.request_stop(), Err(RunError::Lifecycle(_))));
        assert!(matches!(run.await_drained(), Err(RunError::Lifecycle(_))));
        assert!(matches!(run.final_report(), Err(RunError::Lifecycle(_))));

        run.start().unwrap();
        match run.start() {
            Err(RunError::Lifecycle(e)) => {
                assert_eq!(e.operation, "start");
                assert_eq!(e.state, LifecycleState::Running);
            }
            other => panic!("expected lifecycle error, got {:?}", other.map(|_| ())),
        }
        assert!(matches!(run.await_drained(), Err(RunError::Lifecycle(_))));

        run.request_stop().unwrap();
        run.request_stop().unwrap();
        run.await_drained().unwrap();
        run.await_drained().unwrap();
        assert!(run.final_report().is_ok());
    }

    #[test]
    fn test_failed_spawn_releases_started_workers() {
        let dir = tempdir().unwrap();
        let mut log = ResultLog::open(dir.path().join("results.csv")).unwrap();
        let ctx = WorkerContext {
            config: Arc::new(base_config(ExecutionStrategy::Preemptible, 5)),
            operation: Arc::new(simulated()),
            signals: Arc::new(RunSignals::new()),
            aggregator: SharedAggregator::new(),
            recorder: log.recorder(),
        };

        let result = spawn_threads(5, &ctx.signals, |id| {
            if id == 3 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "thread limit reached"));
            }
            let worker = Worker::new(id as u64, ctx.clone());
            thread::Builder::new().spawn(move || worker.run_blocking())
        });

        let err = result.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(ctx.signals.is_stopped());

        // The three started workers exited without doing any work.
        let report = ctx.aggregator.snapshot();
        assert_eq!(report.properly_finished_workers, 3);
        assert_eq!(report.not_working_instances, 3);

        // Only our own recorder is left, so the log closes.
        drop(ctx);
        assert_eq!(log.close().unwrap(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = base_config(ExecutionStrategy::Preemptible, 0);
        assert!(matches!(
            RunController::initialize(config, simulated()),
            Err(RunError::Config(_))
        ));
    }

    #[test]
    fn test_result_log_records_init_and_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");

        for expected_run in 1..=2 {
            let mut config = base_config(ExecutionStrategy::Preemptible, 3).with_single_pass();
            config.result_log = Some(path.clone());
            let mut run = RunController::initialize(config, simulated()).unwrap();
            assert_eq!(run.run_id(), Some(expected_run));
            run.execute().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        // Header + 2 runs of (1 init + 3 samples).
        assert_eq!(lines.len(), 9);
        assert_eq!(lines.iter().filter(|l| l.starts_with("2,")).count(), 4);
        assert_eq!(lines.iter().filter(|l| l.contains(",init,")).count(), 2);
    }
}
