//! Discrete-event simulation kernel.
//!
//! This crate provides the fundamental building blocks every network
//! simulation in the workspace runs on: a virtual clock, a deterministic and
//! cancellable event queue, packet descriptors with flow keys, and packet/byte
//! counters.
//!
//! # Architecture Overview
//!
//! - [`Scheduler`]: owns the clock and the pending events. Callbacks receive it
//!   to read [`Scheduler::time`] and to schedule or cancel further events.
//! - [`Simulation`]: owns a scheduler plus the per-run state `S` (queue and
//!   flow registries in the `netsim` crate) and drives the run loop.
//!
//! Execution is single-threaded and non-preemptive. Events run in
//! non-decreasing time order; events due at the same instant run in the order
//! they were scheduled, so a program replays identically on every run.
//!
//! # Basic Usage
//!
//! ```rust
//! use netsim_core::{SimTime, Simulation, SimulationConfig};
//!
//! let mut sim: Simulation<Vec<u64>> = Simulation::new(SimulationConfig::default());
//! for delay in [5, 1, 3] {
//!     sim.schedule(SimTime::from_secs(delay), move |_, log: &mut Vec<u64>| log.push(delay));
//! }
//! sim.run(None);
//! assert_eq!(sim.state(), &vec![1, 3, 5]);
//! sim.destroy();
//! ```

pub mod counters;
pub mod error;
pub mod execute;
pub mod ids;
pub mod logging;
pub mod packet;
pub mod scheduler;
pub mod time;
pub mod types;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

pub use counters::PacketCounters;
pub use error::{EventError, SimError};
pub use execute::{Execute, Executor};
pub use logging::{
    event_span, flow_span, init_detailed_simulation_logging, init_simulation_logging,
    init_simulation_logging_with_level, queue_span, simulation_span,
};
pub use packet::{FlowKey, PacketDescriptor, PacketUid, PacketUidAllocator, Protocol};
pub use scheduler::{Callback, ClockRef, EventEntry, Scheduler};
pub use time::SimTime;
pub use types::{EventHandle, EventId};

/// Run-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Root seed every random stream of the run is derived from.
    pub seed: u64,
    /// Pending-event count above which a warning is logged once per run.
    pub event_queue_soft_limit: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            event_queue_soft_limit: 1_000_000,
        }
    }
}

/// Per-run state owned by a [`Simulation`].
pub trait RunState {
    /// Releases everything accumulated during the run. Called by
    /// [`Simulation::destroy`].
    fn reset(&mut self);
}

impl RunState for () {
    fn reset(&mut self) {}
}

impl<T> RunState for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl RunState for usize {
    fn reset(&mut self) {
        *self = 0;
    }
}

/// Simulation struct that puts the scheduler and the per-run state together.
///
/// Independent simulations share nothing, so parameter sweeps can keep several
/// of them alive side by side.
pub struct Simulation<S = ()> {
    scheduler: Scheduler<S>,
    state: S,
    config: SimulationConfig,
    destroyed: bool,
    queue_growth_warned: bool,
}

impl<S: Default> Default for Simulation<S> {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl<S: Default> Simulation<S> {
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_state(config, S::default())
    }
}

impl<S> Simulation<S> {
    pub fn with_state(config: SimulationConfig, state: S) -> Self {
        Self {
            scheduler: Scheduler::default(),
            state,
            config,
            destroyed: false,
            queue_growth_warned: false,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.config.seed
    }

    /// Returns the current simulation time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.scheduler.time()
    }

    /// Returns a ClockRef for reading the simulation time.
    pub fn clock(&self) -> ClockRef {
        self.scheduler.clock()
    }

    pub fn scheduler(&self) -> &Scheduler<S> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler<S> {
        self.destroyed = false;
        &mut self.scheduler
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Mutable access to the run state. Like scheduling, this re-arms
    /// [`destroy`](Simulation::destroy).
    pub fn state_mut(&mut self) -> &mut S {
        self.destroyed = false;
        &mut self.state
    }

    /// Borrow the scheduler and the state together, as callbacks see them.
    pub fn parts_mut(&mut self) -> (&mut Scheduler<S>, &mut S) {
        self.destroyed = false;
        (&mut self.scheduler, &mut self.state)
    }

    /// Schedules `callback` to run `delay` after the current time.
    pub fn schedule<F>(&mut self, delay: SimTime, callback: F) -> EventHandle
    where
        F: FnOnce(&mut Scheduler<S>, &mut S) + 'static,
    {
        self.scheduler_mut().schedule(delay, callback)
    }

    /// Schedules `callback` after a delay in fractional seconds.
    ///
    /// # Errors
    ///
    /// [`EventError::InvalidDelay`] for negative or non-finite delays.
    pub fn schedule_secs<F>(&mut self, delay_secs: f64, callback: F) -> Result<EventHandle, EventError>
    where
        F: FnOnce(&mut Scheduler<S>, &mut S) + 'static,
    {
        self.scheduler_mut().schedule_secs(delay_secs, callback)
    }

    /// Cancels a pending event; see [`Scheduler::cancel`].
    pub fn cancel(&mut self, handle: EventHandle) -> Result<bool, EventError> {
        self.scheduler.cancel(handle)
    }

    /// Number of events still waiting to run.
    pub fn pending_events(&self) -> usize {
        self.scheduler.pending_events()
    }

    /// Returns the time of the next scheduled event, or None if no events are scheduled.
    pub fn peek_next_event_time(&mut self) -> Option<SimTime> {
        self.scheduler.peek_next_time()
    }

    /// Performs one step of the simulation. Returns `true` if there was in fact an event
    /// available to process, and `false` otherwise, which signifies that the simulation
    /// ended.
    pub fn step(&mut self) -> bool {
        let Some((entry, callback)) = self.scheduler.pop() else {
            return false;
        };
        let _span = event_span(entry.id(), entry.time()).entered();
        logging::events::event_dispatched(entry.id(), entry.time());
        callback(&mut self.scheduler, &mut self.state);

        let pending = self.scheduler.pending_events();
        if !self.queue_growth_warned && pending > self.config.event_queue_soft_limit {
            self.queue_growth_warned = true;
            logging::diagnostics::excessive_queue_growth(pending, self.config.event_queue_soft_limit);
        }
        true
    }

    /// Runs the simulation with the given executor.
    ///
    /// The stopping condition and other execution details depend on the executor used.
    /// See [`Execute`] and [`Executor`] for more details.
    #[instrument(skip(self, executor), fields(seed = self.config.seed, initial_time = %self.time()))]
    pub fn execute<E: Execute<S>>(&mut self, executor: E) {
        let before = self.scheduler.events_processed();
        executor.execute(self);
        info!(
            final_time = %self.time(),
            events = self.scheduler.events_processed() - before,
            "Simulation execution completed"
        );
    }

    /// Runs events until none are left, a callback calls `stop`, or the next
    /// event would be due after `stop_time`. Returns the number of callbacks
    /// invoked by this call.
    pub fn run(&mut self, stop_time: Option<SimTime>) -> u64 {
        let before = self.scheduler.events_processed();
        logging::events::simulation_started(self.config.seed, stop_time, self.pending_events());
        match stop_time {
            Some(time) => Executor::timed(time).execute(self),
            None => Executor::unbound().execute(self),
        }
        let processed = self.scheduler.events_processed() - before;
        logging::events::simulation_completed(self.time(), processed, self.pending_events());
        processed
    }
}

impl<S: RunState> Simulation<S> {
    /// Tears the run down: pending events are discarded, the per-run state is
    /// reset and the clock goes back to zero. Handles issued before the call
    /// become unknown to the scheduler.
    ///
    /// Returns `false` (and does nothing) when the simulation is already
    /// destroyed and nothing was scheduled since.
    pub fn destroy(&mut self) -> bool {
        if self.destroyed {
            return false;
        }
        let discarded = self.scheduler.clear();
        self.state.reset();
        self.destroyed = true;
        self.queue_growth_warned = false;
        logging::events::simulation_destroyed(discarded);
        true
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}
