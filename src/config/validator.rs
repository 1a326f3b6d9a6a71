//! Configuration Validation
//!
//! Rejects configurations that cannot produce a meaningful run before any
//! worker is spawned.

use log::warn;

use crate::error::ConfigError;

use super::model::{OperationKind, RunConfiguration};

/// Longest slow-simulation delay the protocol accepts, in seconds.
pub const MAX_SLOW_DELAY_SECS: u64 = 60;

/// Validates a run configuration.
///
/// Unknown operation codes are accepted on purpose: they are reported by
/// the first worker that meets them and end only the affected workers.
pub fn validate_config(config: &RunConfiguration) -> Result<(), ConfigError> {
    if config.workers == 0 {
        return Err(ConfigError::invalid("workers", "must be at least 1"));
    }

    if config.target.trim().is_empty() {
        return Err(ConfigError::invalid("target", "must not be empty"));
    }

    if config.single_pass && config.duration_secs > 0 {
        return Err(ConfigError::invalid(
            "single_pass",
            "cannot be combined with a duration",
        ));
    }

    if !(1..=MAX_SLOW_DELAY_SECS).contains(&config.slow_delay_secs) {
        return Err(ConfigError::invalid(
            "slow_delay_secs",
            format!("must be between 1 and {}", MAX_SLOW_DELAY_SECS),
        ));
    }

    if config.is_templated_target() && config.max_targets == 0 {
        return Err(ConfigError::invalid(
            "max_targets",
            "must be at least 1 for a templated target",
        ));
    }

    if config.operation == OperationKind::WeightedMix && config.mix_weights.total() == 0 {
        return Err(ConfigError::invalid(
            "mix_weights",
            "at least one weight must be non-zero",
        ));
    }

    if config.monitor_interval_secs == 0 {
        return Err(ConfigError::invalid("monitor_interval_secs", "must be at least 1"));
    }

    if matches!(config.carrier_threads, Some(0)) {
        return Err(ConfigError::invalid("carrier_threads", "must be at least 1 when set"));
    }

    if matches!(config.blocking_threads, Some(0)) {
        return Err(ConfigError::invalid("blocking_threads", "must be at least 1 when set"));
    }

    if let OperationKind::Unknown(code) = config.operation {
        warn!("Operation code {} is not recognised; workers will stop on first use", code);
    }

    if config.probe && config.is_templated_target() {
        warn!("Probe monitor requested for a templated target; it will stay disabled");
    }

    Ok(())
}
