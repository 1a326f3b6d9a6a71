//! Execution Module
//!
//! The worker pool and the run lifecycle around it.
//!
//! # Architecture
//!
//! - [`controller`]: lifecycle state machine, spawning, draining, reporting
//! - [`worker`]: the per-unit iteration loop for both strategies
//! - [`signals`]: start/stop flags shared with the workers

pub mod controller;
pub mod signals;
pub mod worker;

pub use controller::{LifecycleState, RunController, RunHandle};
pub use signals::RunSignals;
pub use worker::{pick_target, resolve_kind, Resolution, Worker, WorkerContext, WorkerOutcome};
