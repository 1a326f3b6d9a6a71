//! Run Configuration Model
//!
//! Data structures describing one stress run.
//!
//! # Example YAML Format
//!
//! ```yaml
//! target: "127.0.0.1:7878"
//! workers: 64
//! strategy: cooperative
//! duration_secs: 30
//! operation: mix
//! mix_weights:
//!   fast: 3
//!   slow: 1
//!   noop: 1
//! random_wait_ms: 50
//! slow_delay_secs: 5
//! result_log: results/run.csv
//! probe: true
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default address of the service under test.
pub const DEFAULT_TARGET: &str = "127.0.0.1:7878";

/// Placeholder replaced by a random target number in templated targets.
pub const TARGET_PLACEHOLDER: &str = "{nr}";

/// How worker units are scheduled.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One OS thread per worker, blocking operations.
    Preemptible,
    /// One tokio task per worker on a shared runtime.
    #[default]
    Cooperative,
}

impl ExecutionStrategy {
    /// Plural noun used in log lines.
    pub fn unit_plural(&self) -> &'static str {
        match self {
            Self::Preemptible => "threads",
            Self::Cooperative => "tasks",
        }
    }
}

/// When a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Stop after a fixed wall-clock duration.
    Duration(Duration),
    /// Every worker performs one iteration, the run ends when all are done.
    SinglePass,
    /// Run until the operator presses ENTER.
    Interactive,
}

/// Operation selector.
///
/// Numeric codes follow the command-line contract: `0` fast probe,
/// `1` slow simulation, `2` no-op, `32767` weighted mix. Any other code is
/// accepted at parse time and kept as [`OperationKind::Unknown`]; workers
/// terminate when they meet it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "KindRepr", into = "KindRepr")]
pub enum OperationKind {
    FastProbe,
    SlowSimulation,
    NoOp,
    WeightedMix,
    Unknown(u16),
}

impl OperationKind {
    pub const WEIGHTED_MIX_CODE: u16 = 32767;

    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::FastProbe,
            1 => Self::SlowSimulation,
            2 => Self::NoOp,
            Self::WEIGHTED_MIX_CODE => Self::WeightedMix,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::FastProbe => 0,
            Self::SlowSimulation => 1,
            Self::NoOp => 2,
            Self::WeightedMix => Self::WEIGHTED_MIX_CODE,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FastProbe => write!(f, "fast_probe"),
            Self::SlowSimulation => write!(f, "slow_simulation"),
            Self::NoOp => write!(f, "noop"),
            Self::WeightedMix => write!(f, "mix"),
            Self::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

impl FromStr for OperationKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "fast_probe" | "fast" | "probe" => Ok(Self::FastProbe),
            "slow_simulation" | "slow" | "long_run" => Ok(Self::SlowSimulation),
            "noop" | "no_op" => Ok(Self::NoOp),
            "weighted_mix" | "mix" | "random_mix" => Ok(Self::WeightedMix),
            other => other.parse::<u16>().map(Self::from_code).map_err(|_| {
                ConfigError::invalid("operation", format!("unknown operation '{}'", s))
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum KindRepr {
    Code(u16),
    Name(String),
}

impl TryFrom<KindRepr> for OperationKind {
    type Error = ConfigError;

    fn try_from(repr: KindRepr) -> Result<Self, Self::Error> {
        match repr {
            KindRepr::Code(code) => Ok(Self::from_code(code)),
            KindRepr::Name(name) => name.parse(),
        }
    }
}

impl From<OperationKind> for KindRepr {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Unknown(code) => KindRepr::Code(code),
            known => KindRepr::Name(known.to_string()),
        }
    }
}

/// Relative weights used when resolving [`OperationKind::WeightedMix`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixWeights {
    #[serde(default = "default_weight")]
    pub fast: u32,
    #[serde(default = "default_weight")]
    pub slow: u32,
    #[serde(default = "default_weight")]
    pub noop: u32,
}

fn default_weight() -> u32 {
    1
}

impl Default for MixWeights {
    fn default() -> Self {
        Self {
            fast: 1,
            slow: 1,
            noop: 1,
        }
    }
}

impl MixWeights {
    pub fn total(&self) -> u64 {
        self.fast as u64 + self.slow as u64 + self.noop as u64
    }
}

/// Immutable description of one run.
///
/// Built once (from defaults, a YAML file and command-line overrides),
/// validated, then shared read-only by every worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RunConfiguration {
    /// Service address, optionally containing `{nr}`
    pub target: String,

    /// Upper bound (exclusive) for the `{nr}` substitution
    pub max_targets: u32,

    /// Number of concurrent workers
    pub workers: usize,

    /// Scheduling strategy for the workers
    pub strategy: ExecutionStrategy,

    /// Run length in seconds, 0 = until ENTER
    pub duration_secs: u64,

    /// Each worker performs exactly one iteration
    pub single_pass: bool,

    /// Operation every iteration performs
    pub operation: OperationKind,

    /// Weights for the weighted mix
    pub mix_weights: MixWeights,

    /// Upper bound for the random wait before each operation, 0 = none
    pub random_wait_ms: u64,

    /// Delay requested by a slow simulation, in seconds
    pub slow_delay_secs: u64,

    /// Optional CSV result log
    pub result_log: Option<PathBuf>,

    /// Reserve one connection for status probing
    pub probe: bool,

    /// tokio worker threads, runtime default when unset
    pub carrier_threads: Option<usize>,

    /// tokio blocking threads, runtime default when unset
    pub blocking_threads: Option<usize>,

    /// Seconds between progress lines
    pub monitor_interval_secs: u64,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            max_targets: 50,
            workers: default_workers(),
            strategy: ExecutionStrategy::default(),
            duration_secs: 0,
            single_pass: false,
            operation: OperationKind::FastProbe,
            mix_weights: MixWeights::default(),
            random_wait_ms: 0,
            slow_delay_secs: 10,
            result_log: None,
            probe: false,
            carrier_threads: None,
            blocking_threads: None,
            monitor_interval_secs: 5,
        }
    }
}

/// Default worker count: 12.5 workers per logical CPU.
pub fn default_workers() -> usize {
    (num_cpus::get() * 25 / 2).max(1)
}

impl RunConfiguration {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the execution strategy.
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the operation kind.
    pub fn with_operation(mut self, operation: OperationKind) -> Self {
        self.operation = operation;
        self
    }

    /// Switches to single-pass mode.
    pub fn with_single_pass(mut self) -> Self {
        self.single_pass = true;
        self.duration_secs = 0;
        self
    }

    /// Switches to a duration-bounded run.
    pub fn with_duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self.single_pass = false;
        self
    }

    /// Sets the target address or template.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Sets the slow-simulation delay.
    pub fn with_slow_delay_secs(mut self, secs: u64) -> Self {
        self.slow_delay_secs = secs;
        self
    }

    /// Sets the random wait bound.
    pub fn with_random_wait_ms(mut self, ms: u64) -> Self {
        self.random_wait_ms = ms;
        self
    }

    /// Returns how this run ends.
    pub fn mode(&self) -> RunMode {
        if self.single_pass {
            RunMode::SinglePass
        } else if self.duration_secs > 0 {
            RunMode::Duration(Duration::from_secs(self.duration_secs))
        } else {
            RunMode::Interactive
        }
    }

    /// True when the target contains a placeholder and therefore names
    /// several destinations.
    pub fn is_templated_target(&self) -> bool {
        self.target.contains('{')
    }

    pub fn slow_delay(&self) -> Duration {
        Duration::from_secs(self.slow_delay_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    /// One-line summary printed in the final report.
    pub fn summary(&self) -> String {
        format!(
            "workers: {}; strategy: {:?}; operation: {}; single-pass: {}; target: {}",
            self.workers, self.strategy, self.operation, self.single_pass, self.target
        )
    }
}
