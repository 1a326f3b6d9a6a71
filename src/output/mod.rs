//! Output Module
//!
//! Persistent records of runs.
//!
//! - [`result_log`]: append-only CSV event log with run numbering

pub mod result_log;

pub use result_log::{next_run_id, ResultAction, ResultLog, ResultRecorder, ResultRow};
