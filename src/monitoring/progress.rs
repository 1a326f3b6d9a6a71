//! Progress Monitor
//!
//! Periodically logs how far a run has come. Only ever reads the
//! aggregator.

use std::time::Duration;

use log::info;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::stats::{ProgressSnapshot, SharedAggregator};

use super::resource::process_cpu_seconds;
use super::sleep_or_stop;

/// Background task emitting a progress report every interval.
pub struct MonitorLoop {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<u64>>,
}

impl MonitorLoop {
    /// Spawns the monitor on `runtime`.
    pub fn spawn(runtime: &Handle, aggregator: SharedAggregator, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = runtime.spawn(run_monitor(aggregator, interval, stop_rx));
        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stops the monitor and waits for it. Returns how many reports it
    /// emitted. Calling it again returns 0.
    pub fn stop(&mut self, runtime: &Handle) -> u64 {
        let _ = self.stop_tx.send(true);
        match self.handle.take() {
            Some(handle) => runtime.block_on(handle).unwrap_or(0),
            None => 0,
        }
    }
}

async fn run_monitor(
    aggregator: SharedAggregator,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> u64 {
    let mut reports = 0;
    while !sleep_or_stop(&mut stop, interval).await {
        let progress = aggregator.progress();
        for line in progress_lines(&progress, process_cpu_seconds()) {
            info!("{}", line);
        }
        reports += 1;
    }
    reports
}

/// Formats one progress report.
pub fn progress_lines(progress: &ProgressSnapshot, cpu_seconds: f64) -> [String; 3] {
    [
        format!("Total errors so far {}...", progress.total_errors),
        format!(
            "Total samples so far {} after {:.1} s ({:.1}/s)...",
            progress.total_samples, progress.elapsed_secs, progress.samples_per_second
        ),
        format!("Processor time so far {:.1} s", cpu_seconds),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tokio::runtime::Runtime;

    #[test]
    fn test_progress_lines() {
        let progress = ProgressSnapshot {
            total_samples: 1200,
            total_errors: 3,
            elapsed_secs: 10.0,
            samples_per_second: 120.0,
        };
        let lines = progress_lines(&progress, 2.5);
        assert_eq!(lines[0], "Total errors so far 3...");
        assert_eq!(lines[1], "Total samples so far 1200 after 10.0 s (120.0/s)...");
        assert_eq!(lines[2], "Processor time so far 2.5 s");
    }

    #[test]
    fn test_monitor_reports_periodically_and_stops() {
        let runtime = Runtime::new().unwrap();
        let aggregator = SharedAggregator::new();
        let mut monitor =
            MonitorLoop::spawn(runtime.handle(), aggregator.clone(), Duration::from_millis(20));

        thread::sleep(Duration::from_millis(150));
        let reports = monitor.stop(runtime.handle());
        assert!(reports >= 2, "expected several reports, got {}", reports);

        // Second stop is a no-op.
        assert_eq!(monitor.stop(runtime.handle()), 0);
    }

    #[test]
    fn test_monitor_stops_without_waiting_for_interval() {
        let runtime = Runtime::new().unwrap();
        let mut monitor = MonitorLoop::spawn(
            runtime.handle(),
            SharedAggregator::new(),
            Duration::from_secs(3600),
        );

        let started = std::time::Instant::now();
        assert_eq!(monitor.stop(runtime.handle()), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
