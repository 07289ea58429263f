//! Periodic queue occupancy sampling

use netsim_aqm::QueueId;
use netsim_core::{Scheduler, SimTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::NetState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSample {
    pub time: SimTime,
    pub packets: u64,
    pub bytes: u64,
    pub drops: u64,
    pub marks: u64,
}

/// Samples a queue every `period` up to `stop`. Samples are kept in the run
/// state under the tracer's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTracer {
    pub name: String,
    pub queue: QueueId,
    pub period: SimTime,
    pub stop: SimTime,
}

impl QueueTracer {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.period.is_zero() {
            return Err(format!("tracer {:?}: period must be non-zero", self.name));
        }
        Ok(())
    }

    pub(crate) fn install(self, scheduler: &mut Scheduler<NetState>) {
        let period = self.period;
        scheduler.schedule(period, move |scheduler, state| self.sample(scheduler, state));
    }

    fn sample(self, scheduler: &mut Scheduler<NetState>, state: &mut NetState) {
        let now = scheduler.time();
        match state.queues.stats(self.queue) {
            Ok(stats) => state
                .samples
                .entry(self.name.clone())
                .or_default()
                .push(QueueSample {
                    time: now,
                    packets: stats.occupancy_packets,
                    bytes: stats.occupancy_bytes,
                    drops: stats.drop_count,
                    marks: stats.mark_count,
                }),
            Err(e) => {
                warn!(tracer = %self.name, error = %e, "Tracer stopped");
                return;
            }
        }
        if now + self.period <= self.stop {
            let period = self.period;
            scheduler.schedule(period, move |scheduler, state| self.sample(scheduler, state));
        }
    }
}
