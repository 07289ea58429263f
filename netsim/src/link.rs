//! Point-to-point links
//!
//! A link serialises packets out of its queue disc one at a time at its data
//! rate and hands each to the far end after the propagation delay. The far
//! end is either another link or a sink, where the flow monitor records the
//! reception. Queue drops are reported to the flow monitor as they happen.

use netsim_aqm::{Decision, QueueId};
use netsim_core::{PacketCounters, PacketDescriptor, Scheduler, SimTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{trace, warn};

use crate::error::NetError;
use crate::state::{NetState, SINK};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({})", self.0)
    }
}

/// Where a link delivers its packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEnd {
    Sink,
    Link(LinkId),
}

#[derive(Debug, Clone)]
pub struct PointToPointLink {
    pub id: LinkId,
    pub name: String,
    pub rate_bps: u64,
    pub delay: SimTime,
    pub queue: QueueId,
    pub next: LinkEnd,
    /// Sent counts transmissions, received counts deliveries at the far
    /// end, dropped counts queue drops.
    pub counters: PacketCounters,
    busy: bool,
}

impl PointToPointLink {
    pub(crate) fn new(id: LinkId, name: String, rate_bps: u64, delay: SimTime, queue: QueueId) -> Self {
        Self {
            id,
            name,
            rate_bps,
            delay,
            queue,
            next: LinkEnd::Sink,
            counters: PacketCounters::new(),
            busy: false,
        }
    }

    /// Whether a packet is being serialised onto the wire.
    pub fn is_busy(&self) -> bool {
        self.busy
    }
}

/// Offer `packet` to the link's queue at the current time and start
/// transmitting if the link is idle.
pub fn send(
    scheduler: &mut Scheduler<NetState>,
    state: &mut NetState,
    link: LinkId,
    packet: PacketDescriptor,
) -> Result<Decision, NetError> {
    let now = scheduler.time();
    let queue = state.link(link)?.queue;
    let decision = state.queues.enqueue(queue, packet, now)?;
    collect_drops(state, link)?;
    if !state.link(link)?.busy {
        start_next(scheduler, state, link)?;
    }
    Ok(decision)
}

fn collect_drops(state: &mut NetState, link: LinkId) -> Result<(), NetError> {
    let queue = state.link(link)?.queue;
    for dropped in state.queues.take_dropped(queue)? {
        state.flows.record_drop(dropped.packet.flow_key, &dropped.packet);
        state.link_mut(link)?.counters.record_dropped(dropped.packet.size_bytes);
    }
    Ok(())
}

fn start_next(scheduler: &mut Scheduler<NetState>, state: &mut NetState, link: LinkId) -> Result<(), NetError> {
    let now = scheduler.time();
    let queue = state.link(link)?.queue;
    let next = state.queues.dequeue(queue, now)?;
    collect_drops(state, link)?;

    let entry = state.link_mut(link)?;
    let Some(packet) = next else {
        entry.busy = false;
        return Ok(());
    };
    entry.busy = true;
    entry.counters.record_sent(packet.size_bytes);
    let tx_time = SimTime::transmission_time(u64::from(packet.size_bytes), entry.rate_bps);
    let delay = entry.delay;
    trace!(%link, uid = %packet.uid, %tx_time, "Transmission started");

    scheduler.schedule(tx_time, move |scheduler, state| {
        scheduler.schedule(delay, move |scheduler, state| arrive(scheduler, state, link, packet));
        if let Err(e) = start_next(scheduler, state, link) {
            warn!(%link, error = %e, "Link could not continue transmitting");
        }
    });
    Ok(())
}

fn arrive(scheduler: &mut Scheduler<NetState>, state: &mut NetState, link: LinkId, packet: PacketDescriptor) {
    let now = scheduler.time();
    let next = match state.link_mut(link) {
        Ok(entry) => {
            entry.counters.record_received(packet.size_bytes);
            entry.next
        }
        Err(e) => {
            warn!(error = %e, "Packet arrived on a link that no longer exists");
            return;
        }
    };
    match next {
        LinkEnd::Sink => {
            let sent = state.flows.sent_time(packet.uid).unwrap_or(packet.enqueue_time);
            state.flows.record_rx(packet.flow_key, &packet, sent, now);
            state.counters_mut(SINK).record_received(packet.size_bytes);
        }
        LinkEnd::Link(onward) => {
            if let Err(e) = send(scheduler, state, onward, packet) {
                warn!(%link, %onward, error = %e, "Forwarding failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsim_aqm::{QueueConfig, QueueLimit};
    use netsim_core::{FlowKey, Simulation, SimulationConfig};

    fn single_link(limit: u32) -> Simulation<NetState> {
        let mut state = NetState::new(1);
        let queue = state
            .queues
            .create_queue(QueueConfig::tail_drop(QueueLimit::Packets(limit)))
            .unwrap();
        // 8 Mbps: a 1000-byte packet takes 1 ms.
        state.links.push(PointToPointLink::new(
            LinkId(0),
            "bottleneck".to_string(),
            8_000_000,
            SimTime::from_millis(10),
            queue,
        ));
        Simulation::with_state(SimulationConfig::default(), state)
    }

    fn burst(sim: &mut Simulation<NetState>, count: u64) {
        sim.schedule(SimTime::zero(), move |scheduler, state: &mut NetState| {
            let key = FlowKey::udp_v4([10, 1, 1, 1], 49153, [10, 1, 2, 2], 9);
            for _ in 0..count {
                let uid = state.uids.next_uid();
                let packet = PacketDescriptor::new(uid, 1000, key, scheduler.time());
                state.flows.record_tx(key, &packet, scheduler.time());
                send(scheduler, state, LinkId(0), packet).unwrap();
            }
        });
    }

    #[test]
    fn test_serialisation_and_propagation_delay() {
        let mut sim = single_link(100);
        burst(&mut sim, 3);
        sim.run(None);

        let key = FlowKey::udp_v4([10, 1, 1, 1], 49153, [10, 1, 2, 2], 9);
        let record = sim.state().flows.record(&key).unwrap();
        assert_eq!(record.rx_packets, 3);
        // Last packet: 3 ms of serialisation plus 10 ms on the wire.
        assert_eq!(record.last_rx_time, Some(SimTime::from_millis(13)));
        assert_eq!(record.delay_sum, SimTime::from_millis(11 + 12 + 13));
        assert_eq!(sim.time(), SimTime::from_millis(13));

        let link = sim.state().link(LinkId(0)).unwrap();
        assert!(!link.is_busy());
        assert_eq!(link.counters.packets_sent, 3);
        assert_eq!(link.counters.packets_received, 3);
        assert_eq!(sim.state().counters[SINK].packets_received, 3);
    }

    #[test]
    fn test_queue_drops_reach_flow_monitor() {
        // One packet on the wire, two queued, the rest dropped.
        let mut sim = single_link(2);
        burst(&mut sim, 6);
        sim.run(None);

        let key = FlowKey::udp_v4([10, 1, 1, 1], 49153, [10, 1, 2, 2], 9);
        let record = sim.state().flows.record(&key).unwrap();
        assert_eq!(record.tx_packets, 6);
        assert_eq!(record.rx_packets, 3);
        assert_eq!(record.lost_packets, 3);
        assert_eq!(sim.state().flows.in_flight(&key), 0);
        assert_eq!(sim.state().link(LinkId(0)).unwrap().counters.packets_dropped, 3);
        assert_eq!(sim.state().uids.issued(), 6);
    }
}
