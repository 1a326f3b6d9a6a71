//! Monitoring Module
//!
//! Observers that run next to the workers.
//!
//! # Components
//!
//! - [`ResourceSampler`]: process thread/memory/CPU snapshots
//! - [`MonitorLoop`]: periodic progress reports
//! - [`ProbeMonitor`]: optional status probe on a dedicated connection

pub mod probe;
pub mod progress;
pub mod resource;

use std::time::Duration;

use tokio::sync::watch;

pub use probe::{
    ProbeConnector, ProbeMonitor, ProbeSession, ProbeSettings, ProbeStats, StatusCount,
    TcpProbeConnector,
};
pub use progress::{progress_lines, MonitorLoop};
pub use resource::{process_cpu_seconds, ResourceSampler, ResourceSnapshot};

/// Sleeps for `duration` unless a stop is signalled first.
///
/// Returns true when the caller should stop. A dropped sender counts as a
/// stop.
pub(crate) async fn sleep_or_stop(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    let already_stopped = *stop.borrow();
    if already_stopped {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => {
            let stopped = *stop.borrow();
            stopped
        }
        changed = stop.changed() => {
            let stopped = changed.is_err() || *stop.borrow();
            stopped
        }
    }
}
