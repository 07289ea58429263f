//! Everything a network simulation run owns besides its scheduler

use netsim_aqm::QueueRegistry;
use netsim_core::{PacketCounters, PacketUidAllocator, RunState};
use netsim_flow::FlowMonitor;
use std::collections::BTreeMap;

use crate::error::NetError;
use crate::link::{LinkId, PointToPointLink};
use crate::tracer::QueueSample;

/// Component name under which deliveries to a sink are counted.
pub const SINK: &str = "sink";

/// Registries of one run, handed to every callback next to the scheduler.
#[derive(Debug, Default)]
pub struct NetState {
    pub queues: QueueRegistry,
    pub flows: FlowMonitor,
    /// Counters of sources and sinks, by component name.
    pub counters: BTreeMap<String, PacketCounters>,
    pub uids: PacketUidAllocator,
    pub(crate) links: Vec<PointToPointLink>,
    pub(crate) samples: BTreeMap<String, Vec<QueueSample>>,
}

impl NetState {
    pub fn new(seed: u64) -> Self {
        Self {
            queues: QueueRegistry::new(seed),
            ..Self::default()
        }
    }

    pub fn counters_mut(&mut self, component: &str) -> &mut PacketCounters {
        self.counters.entry(component.to_string()).or_default()
    }

    pub fn link(&self, id: LinkId) -> Result<&PointToPointLink, NetError> {
        self.links.get(id.0 as usize).ok_or(NetError::UnknownLink(id))
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> Result<&mut PointToPointLink, NetError> {
        self.links.get_mut(id.0 as usize).ok_or(NetError::UnknownLink(id))
    }

    pub fn links(&self) -> impl Iterator<Item = &PointToPointLink> + '_ {
        self.links.iter()
    }

    pub fn link_by_name(&self, name: &str) -> Option<&PointToPointLink> {
        self.links.iter().find(|link| link.name == name)
    }

    /// Samples collected by the queue tracer of that name.
    pub fn samples(&self, tracer: &str) -> &[QueueSample] {
        self.samples.get(tracer).map_or(&[], Vec::as_slice)
    }
}

impl RunState for NetState {
    fn reset(&mut self) {
        self.queues.clear();
        self.flows.reset();
        self.counters.clear();
        self.uids.reset();
        self.links.clear();
        self.samples.clear();
    }
}
