//! Run Signals
//!
//! Process-wide flags shared by the controller and every worker. The
//! controller is the only writer of `start` and `stop`; workers only read
//! them at the top of each iteration.

use std::sync::atomic::{AtomicBool, Ordering};

/// Start/stop flags plus the one-shot "unknown operation" marker.
#[derive(Debug, Default)]
pub struct RunSignals {
    start: AtomicBool,
    stop: AtomicBool,
    kind_error_logged: AtomicBool,
}

impl RunSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_start(&self) {
        self.start.store(true, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.start.load(Ordering::Acquire)
    }

    pub fn set_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Claims the right to log the unknown-operation error.
    ///
    /// Returns true for exactly one caller over the life of the run.
    pub fn claim_kind_error(&self) -> bool {
        self.kind_error_logged
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_flags_start_cleared() {
        let signals = RunSignals::new();
        assert!(!signals.is_started());
        assert!(!signals.is_stopped());

        signals.set_start();
        signals.set_stop();
        assert!(signals.is_started());
        assert!(signals.is_stopped());
    }

    #[test]
    fn test_kind_error_claimed_once_across_threads() {
        let signals = Arc::new(RunSignals::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let signals = Arc::clone(&signals);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if signals.claim_kind_error() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(!signals.claim_kind_error());
    }
}
