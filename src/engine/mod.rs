//! The appointment polling engine.
//!
//! `state` holds the phase table, `runner` drives a run through it, and
//! `shared` is the state the controller observes.

pub(crate) mod runner;
pub(crate) mod shared;
pub mod state;

pub use state::{AppointmentDetails, ConnectionStatus, EngineEvent, EnginePhase, InvalidTransition, next_phase};

use serde::Serialize;
use thiserror::Error;

/// Raised when consecutive failures reach the configured threshold.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("giving up after {failures} consecutive failures (last: {last_cause})")]
pub struct FatalError {
    pub failures: u32,
    pub last_cause: String,
}
