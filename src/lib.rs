//! dbstress - Concurrent Round-Trip Stress Engine
//!
//! Drives many concurrent workers against a request/response service,
//! times the seven phases of every round trip and folds them into one
//! consistent report while the workers are still writing.
//!
//! # Architecture
//!
//! - [`config`]: run configuration, YAML loading and validation
//! - [`execution`]: run lifecycle, worker pool and shared signals
//! - [`operation`]: the round-trip contract and its implementations
//! - [`stats`]: concurrent aggregation and the final report
//! - [`monitoring`]: resource sampling, progress reports and the status probe
//! - [`output`]: the append-only result log
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use dbstress::{RunConfiguration, RunController, SimulatedOperation};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfiguration::new().with_workers(16).with_duration_secs(10);
//!     let operation = SimulatedOperation::new(config.slow_delay());
//!
//!     let mut run = RunController::initialize(config, operation)?;
//!     let report = run.execute()?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod operation;
pub mod output;
pub mod stats;

// Re-export commonly used types
pub use config::{load_config, ExecutionStrategy, OperationKind, RunConfiguration, RunMode};
pub use error::{OperationError, RunError};
pub use execution::{LifecycleState, RunController, RunHandle};
pub use operation::{Operation, Phase, PhaseMeasurement, SimulatedOperation, TcpOperation};
pub use stats::{RunReport, SharedAggregator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "dbstress";
