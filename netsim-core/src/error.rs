//! Error types for the simulation kernel

use thiserror::Error;

use crate::time::SimTime;
use crate::types::EventId;

/// Top-level error type for simulation operations
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Time validation error: expected non-negative, finite time")]
    InvalidTime,
}

/// Errors related to event scheduling and cancellation.
///
/// All of these are programming errors: the offending call is rejected and the
/// scheduler state is left untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("Invalid event delay: {seconds}s (must be finite and non-negative)")]
    InvalidDelay { seconds: f64 },

    #[error("Event scheduling failed: {requested} is before current time {now}")]
    ScheduleInPast { requested: SimTime, now: SimTime },

    #[error("Unknown event handle: {0} was never issued by this run")]
    UnknownHandle(EventId),
}
