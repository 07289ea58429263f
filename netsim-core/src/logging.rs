//! Structured logging for simulation debugging
//!
//! All crates of the workspace log through `tracing`. This module installs a
//! `tracing-subscriber` formatter and provides span helpers and small logging
//! functions for recurring simulation events.
//!
//! # Controlling output
//!
//! ```rust
//! use netsim_core::logging::init_simulation_logging_with_level;
//! init_simulation_logging_with_level("debug");
//! ```
//!
//! `RUST_LOG` always wins over the level passed in code:
//!
//! ```bash
//! RUST_LOG=netsim_aqm=debug cargo run --example dumbbell_aqm
//! RUST_LOG=netsim_core::scheduler=trace,netsim_flow=debug cargo test
//! ```
//!
//! Level guidelines:
//! - **TRACE**: every dispatched event and every queue decision
//! - **DEBUG**: scheduling, cancellation, AQM drops and marks
//! - **INFO**: run start/end, destroy
//! - **WARN**: rejected calls (negative delay, unknown handle, zero-size packet)

use crate::{EventId, SimTime};
use tracing::{debug, info, trace, warn, Span};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging at `info` level.
pub fn init_simulation_logging() {
    init_simulation_logging_with_level("info")
}

/// Initialize logging with a specific level for the netsim crates.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place.
pub fn init_simulation_logging_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "warn,netsim={level},netsim_core={level},netsim_aqm={level},netsim_flow={level}"
        )
        .into()
    });

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        info!("Simulation logging initialized at level: {}", level);
    }
}

/// Initialize very verbose, pretty-printed logging.
pub fn init_detailed_simulation_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "debug,netsim_core=trace,netsim_aqm=trace,netsim_flow=debug".into());

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        info!("Detailed simulation logging initialized");
    }
}

/// Span covering one simulation run.
pub fn simulation_span(name: &str, seed: u64) -> Span {
    tracing::info_span!("simulation", name = name, seed = seed)
}

/// Span covering the dispatch of a single event.
pub fn event_span(event_id: EventId, time: SimTime) -> Span {
    tracing::trace_span!("event", id = %event_id, time = %time)
}

/// Span covering operations on one queue disc.
pub fn queue_span(queue_id: u32, kind: &str) -> Span {
    tracing::debug_span!("queue", id = queue_id, kind = kind)
}

/// Span covering updates to one flow record.
pub fn flow_span(flow_id: u32) -> Span {
    tracing::trace_span!("flow", id = flow_id)
}

/// Logging utilities for common simulation events
pub mod events {
    use super::*;

    pub fn simulation_started(seed: u64, stop_time: Option<SimTime>, pending_events: usize) {
        match stop_time {
            Some(stop) => info!(seed, stop_time = %stop, pending_events, "Simulation run started"),
            None => info!(seed, pending_events, "Simulation run started (unbounded)"),
        }
    }

    pub fn simulation_completed(final_time: SimTime, events_processed: u64, pending_events: usize) {
        info!(
            final_time = %final_time,
            events_processed,
            pending_events,
            "Simulation run completed"
        );
    }

    pub fn simulation_destroyed(discarded_events: usize) {
        info!(discarded_events, "Simulation destroyed");
    }

    pub fn event_scheduled(event_id: EventId, due: SimTime, now: SimTime) {
        trace!(event = %event_id, due = %due, now = %now, "Event scheduled");
    }

    pub fn event_dispatched(event_id: EventId, time: SimTime) {
        trace!(event = %event_id, time = %time, "Dispatching event");
    }

    pub fn scheduler_state(current_time: SimTime, pending_events: usize, next_event_time: Option<SimTime>) {
        debug!(
            current_time = %current_time,
            pending_events,
            next_event_time = ?next_event_time,
            "Scheduler state"
        );
    }
}

/// Logging utilities for error conditions and warnings
pub mod diagnostics {
    use super::*;

    /// A call was rejected as a programming error.
    pub fn rejected_call(operation: &str, error: &dyn std::error::Error) {
        warn!(operation, error = %error, "Rejected call");
    }

    /// The event queue grew past a soft threshold.
    pub fn excessive_queue_growth(queue_size: usize, threshold: usize) {
        warn!(queue_size, threshold, "Event queue growing excessively");
    }
}

/// Helper for logging with simulation time context
#[macro_export]
macro_rules! sim_log_with_time {
    ($level:ident, $time:expr, $($arg:tt)*) => {
        tracing::$level!(time = %$time, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_initialization_is_idempotent() {
        init_simulation_logging_with_level("debug");
        init_simulation_logging_with_level("trace");
        init_detailed_simulation_logging();
        debug!("still logging");
    }

    #[test]
    fn test_span_creation() {
        let _sim = simulation_span("test", 7).entered();
        let _event = event_span(EventId(1), SimTime::from_millis(100)).entered();
        let _queue = queue_span(3, "red");
        let _flow = flow_span(1);
    }

    #[test]
    fn test_event_logging() {
        events::simulation_started(1, Some(SimTime::from_secs(10)), 3);
        events::event_scheduled(EventId(1), SimTime::from_millis(100), SimTime::zero());
        events::event_dispatched(EventId(1), SimTime::from_millis(100));
        events::scheduler_state(SimTime::from_secs(1), 2, None);
        events::simulation_completed(SimTime::from_secs(5), 100, 0);
        events::simulation_destroyed(4);
        sim_log_with_time!(info, SimTime::from_millis(1), "with time context");
    }
}
