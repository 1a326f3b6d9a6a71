//! Error Types
//!
//! Every failure the engine can surface, grouped by how far it is
//! allowed to travel:
//!
//! - [`OperationError`]: one round trip failed. Folded into the error table.
//! - [`ConfigError`]: the run configuration is unusable.
//! - [`LifecycleError`]: the controller API was called out of order.
//! - [`ConnectivityError`]: the probe monitor lost its connection.
//! - [`RunError`]: anything that aborts a whole run.

use std::io;

use thiserror::Error;

use crate::execution::LifecycleState;

/// Failure of a single round trip against the target service.
#[derive(Error, Debug)]
pub enum OperationError {
    /// The service answered with a coded error.
    #[error("[{code}] {message}")]
    Driver { code: i32, message: String },

    /// Transport failure (connect, read, write).
    #[error("{0}")]
    Io(#[from] io::Error),

    /// The reply could not be understood.
    #[error("{0}")]
    Protocol(String),
}

impl OperationError {
    /// Returns the stable key this error is counted under.
    ///
    /// Driver errors are keyed by code and message, everything else by
    /// its message alone.
    pub fn classify(&self) -> String {
        self.to_string()
    }
}

/// Invalid or unreadable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Controller API misuse, e.g. starting a run twice.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot {operation} while run is {state:?}")]
pub struct LifecycleError {
    pub operation: &'static str,
    pub state: LifecycleState,
}

/// Probe monitor connection failure. Never fatal to the run.
#[derive(Error, Debug)]
pub enum ConnectivityError {
    #[error("connection failed: {0}")]
    Connect(#[source] io::Error),

    #[error("status query failed: {0}")]
    Query(#[source] io::Error),

    #[error("malformed status line: {0}")]
    Malformed(String),
}

/// Process resource query failure. Only the affected sample is lost.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("cannot determine current process id: {0}")]
    Pid(String),

    #[error("process {0} not visible to the system query")]
    ProcessNotFound(u32),
}

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} panicked")]
    Panicked(String),
}

/// Result alias for run-level operations.
pub type Result<T> = std::result::Result<T, RunError>;
