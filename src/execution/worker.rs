//! Worker Loop
//!
//! One execution unit. Each iteration waits for the start signal, checks
//! the stop signal, resolves what to run, optionally waits a random time,
//! performs one round trip and records the outcome. Local counters are
//! published to the aggregator exactly once, when the worker exits.
//!
//! The same iteration logic backs both strategies: [`Worker::run_blocking`]
//! on a dedicated OS thread and [`Worker::run_cooperative`] as a tokio task.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{MixWeights, OperationKind, RunConfiguration, TARGET_PLACEHOLDER};
use crate::error::OperationError;
use crate::operation::{Operation, PhaseMeasurement};
use crate::output::ResultRecorder;
use crate::stats::SharedAggregator;

use super::signals::RunSignals;

/// Pause between checks of the start signal.
const START_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What an iteration should do with the configured kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Run(OperationKind),
    Skip,
    Terminate,
}

/// Resolves the configured kind for one iteration.
///
/// [`OperationKind::WeightedMix`] draws fast/slow/no-op according to the
/// weights. Unknown codes, and a mix with no weight at all, cannot be
/// resolved.
pub fn resolve_kind<R: Rng + ?Sized>(
    kind: OperationKind,
    weights: &MixWeights,
    rng: &mut R,
) -> Resolution {
    match kind {
        OperationKind::FastProbe | OperationKind::SlowSimulation => Resolution::Run(kind),
        OperationKind::NoOp => Resolution::Skip,
        OperationKind::WeightedMix => {
            let total = weights.total();
            if total == 0 {
                return Resolution::Terminate;
            }
            let draw = rng.gen_range(0..total);
            if draw < u64::from(weights.fast) {
                Resolution::Run(OperationKind::FastProbe)
            } else if draw < u64::from(weights.fast) + u64::from(weights.slow) {
                Resolution::Run(OperationKind::SlowSimulation)
            } else {
                Resolution::Skip
            }
        }
        OperationKind::Unknown(_) => Resolution::Terminate,
    }
}

/// Substitutes the target placeholder with a number in `[1, max_targets)`.
pub fn pick_target<R: Rng + ?Sized>(template: &str, max_targets: u32, rng: &mut R) -> String {
    if !template.contains(TARGET_PLACEHOLDER) {
        return template.to_string();
    }
    let nr = rng.gen_range(1..max_targets.max(2));
    template.replace(TARGET_PLACEHOLDER, &nr.to_string())
}

/// Random wait before a resolved iteration, in `[0, bound)`.
fn random_wait<R: Rng + ?Sized>(resolution: Resolution, config: &RunConfiguration, rng: &mut R) -> Duration {
    let bound_ms = match resolution {
        Resolution::Skip => config.slow_delay_secs.saturating_mul(1000),
        _ => config.random_wait_ms,
    };
    if bound_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rng.gen_range(0..bound_ms))
    }
}

/// Counters a worker publishes when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub started: u64,
    pub completed: u64,
}

/// Everything a worker shares with the rest of the run.
pub struct WorkerContext<O> {
    pub config: Arc<RunConfiguration>,
    pub operation: Arc<O>,
    pub signals: Arc<RunSignals>,
    pub aggregator: SharedAggregator,
    pub recorder: Option<ResultRecorder>,
}

impl<O> Clone for WorkerContext<O> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            operation: Arc::clone(&self.operation),
            signals: Arc::clone(&self.signals),
            aggregator: self.aggregator.clone(),
            recorder: self.recorder.clone(),
        }
    }
}

/// Outcome of the decision half of an iteration.
enum Step {
    Exit,
    Skip { wait: Duration },
    Run { kind: OperationKind, target: String, wait: Duration },
}

/// A single execution unit.
pub struct Worker<O> {
    id: u64,
    ctx: WorkerContext<O>,
    rng: StdRng,
    outcome: WorkerOutcome,
}

impl<O: Operation> Worker<O> {
    /// Creates a worker with an entropy-seeded generator.
    pub fn new(id: u64, ctx: WorkerContext<O>) -> Self {
        Self::with_rng(id, ctx, StdRng::from_entropy())
    }

    pub fn with_rng(id: u64, ctx: WorkerContext<O>, rng: StdRng) -> Self {
        Self {
            id,
            ctx,
            rng,
            outcome: WorkerOutcome::default(),
        }
    }

    /// Runs the loop on the current thread until stopped.
    pub fn run_blocking(mut self) -> WorkerOutcome {
        while !self.ctx.signals.is_started() {
            if self.ctx.signals.is_stopped() {
                return self.finish();
            }
            thread::sleep(START_POLL_INTERVAL);
        }

        loop {
            match self.next_step() {
                Step::Exit => break,
                Step::Skip { wait } => {
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                }
                Step::Run { kind, target, wait } => {
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                    self.outcome.started += 1;
                    let started_at = Utc::now();
                    let result = self.ctx.operation.execute(&target, kind);
                    self.record(started_at, result);
                }
            }
            if self.ctx.config.single_pass {
                break;
            }
        }

        self.finish()
    }

    /// Runs the loop as a task until stopped. Never blocks the carrier
    /// thread outside of the operation itself.
    pub async fn run_cooperative(mut self) -> WorkerOutcome {
        while !self.ctx.signals.is_started() {
            if self.ctx.signals.is_stopped() {
                return self.finish();
            }
            tokio::time::sleep(START_POLL_INTERVAL).await;
        }

        loop {
            match self.next_step() {
                Step::Exit => break,
                Step::Skip { wait } => {
                    if wait.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(wait).await;
                    }
                }
                Step::Run { kind, target, wait } => {
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                    self.outcome.started += 1;
                    let started_at = Utc::now();
                    let result = self.ctx.operation.execute_async(&target, kind).await;
                    let failed = result.is_err();
                    self.record(started_at, result);
                    if failed {
                        tokio::task::yield_now().await;
                    }
                }
            }
            if self.ctx.config.single_pass {
                break;
            }
        }

        self.finish()
    }

    fn next_step(&mut self) -> Step {
        if self.ctx.signals.is_stopped() {
            return Step::Exit;
        }

        let config = &self.ctx.config;
        let resolution = resolve_kind(config.operation, &config.mix_weights, &mut self.rng);
        if resolution == Resolution::Terminate {
            if self.ctx.signals.claim_kind_error() {
                error!(
                    "Operation '{}' cannot be resolved; workers are terminating",
                    config.operation
                );
            }
            return Step::Exit;
        }

        let wait = random_wait(resolution, config, &mut self.rng);
        match resolution {
            Resolution::Run(kind) => Step::Run {
                kind,
                target: pick_target(&config.target, config.max_targets, &mut self.rng),
                wait,
            },
            _ => Step::Skip { wait },
        }
    }

    fn record(
        &mut self,
        started_at: chrono::DateTime<Utc>,
        result: Result<PhaseMeasurement, OperationError>,
    ) {
        match result {
            Ok(measurement) => {
                self.ctx.aggregator.record_success(&measurement);
                self.outcome.completed += 1;
                if let Some(recorder) = &self.ctx.recorder {
                    recorder.sample_completed(
                        started_at,
                        Duration::from_nanos(measurement.total_ticks()),
                        self.id,
                    );
                }
            }
            Err(e) => {
                debug!("Worker {}: {}", self.id, e);
                self.ctx.aggregator.record_error(&e.classify());
            }
        }
    }

    /// Publishes the counters. Consumes the worker, so it happens once.
    fn finish(self) -> WorkerOutcome {
        let outcome = self.outcome;
        self.ctx
            .aggregator
            .record_worker_outcome(outcome.started, outcome.completed);
        debug!(
            "Worker {} finished: {} started, {} completed",
            self.id, outcome.started, outcome.completed
        );
        outcome
    }
}
