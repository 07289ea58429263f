//! Constant bit rate traffic

use netsim_core::{FlowKey, PacketDescriptor, Scheduler, SimTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::link::{self, LinkId};
use crate::state::NetState;

/// Sends fixed-size packets of one flow into a link at a constant rate
/// between `start` and `stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantBitRateSource {
    pub name: String,
    pub link: LinkId,
    pub flow_key: FlowKey,
    pub packet_size: u32,
    pub rate_bps: u64,
    pub start: SimTime,
    pub stop: SimTime,
    #[serde(default)]
    pub ecn_capable: bool,
}

impl ConstantBitRateSource {
    /// Gap between two packets.
    pub fn interval(&self) -> SimTime {
        SimTime::transmission_time(u64::from(self.packet_size), self.rate_bps)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.packet_size == 0 {
            return Err(format!("source {:?}: packet_size must be non-zero", self.name));
        }
        if self.rate_bps == 0 {
            return Err(format!("source {:?}: rate_bps must be non-zero", self.name));
        }
        if self.stop < self.start {
            return Err(format!("source {:?}: stops before it starts", self.name));
        }
        Ok(())
    }

    /// Schedule the first emission.
    pub(crate) fn install(self, scheduler: &mut Scheduler<NetState>) {
        let delay = self.start.saturating_sub(scheduler.time());
        debug!(source = %self.name, start = %self.start, stop = %self.stop, "Source installed");
        scheduler.schedule(delay, move |scheduler, state| self.emit(scheduler, state));
    }

    fn emit(self, scheduler: &mut Scheduler<NetState>, state: &mut NetState) {
        let now = scheduler.time();
        if now >= self.stop {
            return;
        }
        let uid = state.uids.next_uid();
        let mut packet = PacketDescriptor::new(uid, self.packet_size, self.flow_key, now);
        packet.ecn_capable = self.ecn_capable;
        state.flows.record_tx(self.flow_key, &packet, now);
        state.counters_mut(&self.name).record_sent(self.packet_size);
        if let Err(e) = link::send(scheduler, state, self.link, packet) {
            warn!(source = %self.name, error = %e, "Send failed");
        }

        let interval = self.interval();
        if now + interval < self.stop {
            scheduler.schedule(interval, move |scheduler, state| self.emit(scheduler, state));
        }
    }
}
