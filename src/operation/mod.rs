//! Round-Trip Operations
//!
//! The engine only depends on the [`Operation`] contract: perform one round
//! trip against a target and either return seven phase timings or a
//! classifiable failure.
//!
//! - [`tcp`]: line-oriented request/response over TCP
//! - [`simulated`]: in-process stand-in used for dry runs

pub mod simulated;
pub mod tcp;

use std::fmt;
use std::future::Future;
use std::time::Instant;

use crate::config::OperationKind;
use crate::error::OperationError;

pub use simulated::SimulatedOperation;
pub use tcp::TcpOperation;

/// Number of timed phases in one round trip.
pub const PHASE_COUNT: usize = 7;

/// The timed phases of a round trip, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    ConnectionCreate,
    ConnectionOpen,
    CommandCreate,
    ExecuteFirstRow,
    RowRead,
    CommandTeardown,
    ConnectionTeardown,
}

impl Phase {
    pub const ALL: [Phase; PHASE_COUNT] = [
        Phase::ConnectionCreate,
        Phase::ConnectionOpen,
        Phase::CommandCreate,
        Phase::ExecuteFirstRow,
        Phase::RowRead,
        Phase::CommandTeardown,
        Phase::ConnectionTeardown,
    ];

    /// Position of this phase in [`Phase::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Series name used in reports.
    pub fn series_name(self) -> &'static str {
        match self {
            Phase::ConnectionCreate => "01ConnectionCreate",
            Phase::ConnectionOpen => "02ConnectionOpen",
            Phase::CommandCreate => "03CommandCreate",
            Phase::ExecuteFirstRow => "04ExecuteFirstRow",
            Phase::RowRead => "05RowRead",
            Phase::CommandTeardown => "06CommandTeardown",
            Phase::ConnectionTeardown => "07ConnectionTeardown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.series_name())
    }
}

/// Elapsed nanoseconds of each phase of one successful round trip.
///
/// Every mark is measured from the end of the previous phase, so the marks
/// sum to the total round-trip time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseMeasurement {
    pub ticks: [u64; PHASE_COUNT],
}

impl PhaseMeasurement {
    pub fn new(ticks: [u64; PHASE_COUNT]) -> Self {
        Self { ticks }
    }

    pub fn get(&self, phase: Phase) -> u64 {
        self.ticks[phase.index()]
    }

    /// Sum of all phases.
    pub fn total_ticks(&self) -> u64 {
        self.ticks.iter().fold(0u64, |acc, t| acc.saturating_add(*t))
    }
}

/// Stopwatch that records consecutive phase laps.
#[derive(Debug)]
pub struct PhaseClock {
    last: Instant,
    ticks: [u64; PHASE_COUNT],
}

impl PhaseClock {
    /// Starts timing the first phase now.
    pub fn start() -> Self {
        Self {
            last: Instant::now(),
            ticks: [0; PHASE_COUNT],
        }
    }

    /// Ends `phase`, recording the time since the previous lap.
    pub fn lap(&mut self, phase: Phase) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_nanos();
        self.ticks[phase.index()] = u64::try_from(elapsed).unwrap_or(u64::MAX);
        self.last = now;
    }

    pub fn finish(self) -> PhaseMeasurement {
        PhaseMeasurement::new(self.ticks)
    }
}

/// One round trip against a target service.
///
/// `execute` is used by preemptible workers and may block; `execute_async`
/// is used by cooperative workers and must not block the runtime. Both
/// receive an already resolved kind ([`OperationKind::FastProbe`] or
/// [`OperationKind::SlowSimulation`]).
pub trait Operation: Send + Sync + 'static {
    fn execute(&self, target: &str, kind: OperationKind) -> Result<PhaseMeasurement, OperationError>;

    fn execute_async(
        &self,
        target: &str,
        kind: OperationKind,
    ) -> impl Future<Output = Result<PhaseMeasurement, OperationError>> + Send;
}

pub(crate) fn unsupported(kind: OperationKind) -> OperationError {
    OperationError::Protocol(format!("operation '{}' cannot be executed", kind))
}
