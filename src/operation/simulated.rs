//! Simulated Operation
//!
//! In-process stand-in for a real service. Useful to exercise the engine
//! (and to measure its own overhead) without any network target.

use std::thread;
use std::time::Duration;

use crate::config::OperationKind;
use crate::error::OperationError;

use super::{unsupported, Operation, Phase, PhaseClock, PhaseMeasurement};

/// Default service time of a fast probe.
const DEFAULT_FAST_LATENCY: Duration = Duration::from_millis(1);

/// Operation that sleeps instead of talking to a service.
///
/// The fast probe takes `fast_latency`, the slow simulation takes
/// `slow_delay`. The time is spent in the execute phase, every other phase
/// is near zero.
#[derive(Debug, Clone)]
pub struct SimulatedOperation {
    fast_latency: Duration,
    slow_delay: Duration,
}

impl SimulatedOperation {
    pub fn new(slow_delay: Duration) -> Self {
        Self {
            fast_latency: DEFAULT_FAST_LATENCY,
            slow_delay,
        }
    }

    /// Sets the service time of a fast probe.
    pub fn with_fast_latency(mut self, latency: Duration) -> Self {
        self.fast_latency = latency;
        self
    }

    fn service_time(&self, kind: OperationKind) -> Result<Duration, OperationError> {
        match kind {
            OperationKind::FastProbe => Ok(self.fast_latency),
            OperationKind::SlowSimulation => Ok(self.slow_delay),
            other => Err(unsupported(other)),
        }
    }
}

fn lap_remaining(clock: &mut PhaseClock) {
    for phase in [
        Phase::RowRead,
        Phase::CommandTeardown,
        Phase::ConnectionTeardown,
    ] {
        clock.lap(phase);
    }
}

impl Operation for SimulatedOperation {
    fn execute(&self, _target: &str, kind: OperationKind) -> Result<PhaseMeasurement, OperationError> {
        let mut clock = PhaseClock::start();
        clock.lap(Phase::ConnectionCreate);
        clock.lap(Phase::ConnectionOpen);
        let service_time = self.service_time(kind)?;
        clock.lap(Phase::CommandCreate);

        thread::sleep(service_time);
        clock.lap(Phase::ExecuteFirstRow);

        lap_remaining(&mut clock);
        Ok(clock.finish())
    }

    async fn execute_async(
        &self,
        _target: &str,
        kind: OperationKind,
    ) -> Result<PhaseMeasurement, OperationError> {
        let mut clock = PhaseClock::start();
        clock.lap(Phase::ConnectionCreate);
        clock.lap(Phase::ConnectionOpen);
        let service_time = self.service_time(kind)?;
        clock.lap(Phase::CommandCreate);

        tokio::time::sleep(service_time).await;
        clock.lap(Phase::ExecuteFirstRow);

        lap_remaining(&mut clock);
        Ok(clock.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_probe_latency() {
        let op = SimulatedOperation::new(Duration::from_secs(1))
            .with_fast_latency(Duration::from_millis(5));
        let m = op.execute("ignored", OperationKind::FastProbe).unwrap();
        assert!(m.get(Phase::ExecuteFirstRow) >= 5_000_000);
    }

    #[test]
    fn test_noop_is_not_executable() {
        let op = SimulatedOperation::new(Duration::from_secs(1));
        assert!(op.execute("ignored", OperationKind::NoOp).is_err());
    }

    #[tokio::test]
    async fn test_slow_simulation_async() {
        let op = SimulatedOperation::new(Duration::from_millis(30));
        let m = op
            .execute_async("ignored", OperationKind::SlowSimulation)
            .await
            .unwrap();
        assert!(m.get(Phase::ExecuteFirstRow) >= 30_000_000);
    }
}
