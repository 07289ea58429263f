use crate::{SimTime, Simulation};

/// Simulation execution trait.
pub trait Execute<S> {
    /// Executes the simulation until some stopping condition is reached.
    /// The condition is implementation-specific.
    fn execute(self, sim: &mut Simulation<S>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndCondition {
    Time(SimTime),
    NoEvents,
    Steps(usize),
}

/// Executor is used for simple execution of an entire simulation.
///
/// Every variant also returns early when a callback calls
/// [`Scheduler::stop`](crate::Scheduler::stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executor {
    end_condition: EndCondition,
}

impl Executor {
    /// Simulation will end only once there is no available events in the queue.
    #[must_use]
    pub fn unbound() -> Self {
        Self {
            end_condition: EndCondition::NoEvents,
        }
    }

    /// Runs every event due at or before `time`. Events due later stay queued
    /// and the clock is left at the last executed event.
    #[must_use]
    pub fn timed(time: SimTime) -> Self {
        Self {
            end_condition: EndCondition::Time(time),
        }
    }

    /// Simulation will execute exactly this many steps, unless we run out of events.
    #[must_use]
    pub fn steps(steps: usize) -> Self {
        Self {
            end_condition: EndCondition::Steps(steps),
        }
    }

    /// Registers a side effect that is called _after_ each simulation step.
    #[must_use]
    pub fn side_effect<S, F>(self, func: F) -> ExecutorWithSideEffect<F>
    where
        F: FnMut(&Simulation<S>),
    {
        ExecutorWithSideEffect {
            end_condition: self.end_condition,
            side_effect: func,
        }
    }
}

impl<S> Execute<S> for Executor {
    fn execute(self, sim: &mut Simulation<S>) {
        run_with(sim, self.end_condition, |_| {});
    }
}

pub struct ExecutorWithSideEffect<F> {
    end_condition: EndCondition,
    side_effect: F,
}

impl<S, F> Execute<S> for ExecutorWithSideEffect<F>
where
    F: FnMut(&Simulation<S>),
{
    fn execute(self, sim: &mut Simulation<S>) {
        run_with(sim, self.end_condition, self.side_effect);
    }
}

fn run_with<S, F>(sim: &mut Simulation<S>, end_condition: EndCondition, mut side_effect: F)
where
    F: FnMut(&Simulation<S>),
{
    let mut step = |sim: &mut Simulation<S>| {
        let result = sim.step();
        if result {
            side_effect(sim);
        }
        result
    };
    match end_condition {
        EndCondition::Time(time) => {
            while sim.scheduler.peek_next_time().is_some_and(|t| t <= time) {
                step(sim);
                if sim.scheduler.take_stop_request() {
                    break;
                }
            }
        }
        EndCondition::NoEvents => {
            while step(sim) {
                if sim.scheduler.take_stop_request() {
                    break;
                }
            }
        }
        EndCondition::Steps(steps) => {
            for _ in 0..steps {
                if !step(sim) || sim.scheduler.take_stop_request() {
                    break;
                }
            }
        }
    }
}
