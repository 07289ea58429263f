//! Deterministic discrete-event network simulation.
//!
//! This crate ties the workspace together: the event kernel from
//! `netsim-core`, the queue discs from `netsim-aqm` and the flow monitor
//! from `netsim-flow`, plus a small network model built from scheduled
//! events (point-to-point links, constant bit rate sources, periodic queue
//! tracers).
//!
//! # Quick Start
//!
//! ```rust
//! use netsim::prelude::*;
//!
//! let mut sim = NetSimulation::new(SimulationConfig::default());
//! let link = sim
//!     .add_link(LinkConfig::new(
//!         "bottleneck",
//!         10_000_000,
//!         SimTime::from_millis(5),
//!         QueueConfig::tail_drop(QueueLimit::Packets(100)),
//!     ))
//!     .unwrap();
//! let flow = FlowKey::udp_v4([10, 1, 1, 1], 49153, [10, 1, 2, 2], 9);
//! sim.add_source(ConstantBitRateSource {
//!     name: "cbr".to_string(),
//!     link,
//!     flow_key: flow,
//!     packet_size: 1000,
//!     rate_bps: 1_000_000,
//!     start: SimTime::zero(),
//!     stop: SimTime::from_secs(1),
//!     ecn_capable: false,
//! })
//! .unwrap();
//! sim.run(None);
//! assert_eq!(sim.flows().record(&flow).unwrap().rx_packets, 125);
//! sim.destroy();
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod source;
pub mod state;
pub mod tracer;

use netsim_aqm::{validate_packet, Decision, QueueConfig, QueueId, QueueStats};
use netsim_core::{
    simulation_span, EventError, EventHandle, PacketDescriptor, Scheduler, SimTime, Simulation,
    SimulationConfig,
};
use netsim_flow::{FlowMonitor, DEFAULT_MAX_DELAY};
use std::collections::HashMap;
use tracing::info;

pub use config::{LinkConfig, ScenarioConfig, SourceConfig, TracerConfig};
pub use error::NetError;
pub use link::{LinkEnd, LinkId, PointToPointLink};
pub use source::ConstantBitRateSource;
pub use state::{NetState, SINK};
pub use tracer::{QueueSample, QueueTracer};

pub use netsim_aqm as aqm;
pub use netsim_core as core;
pub use netsim_flow as flow;

pub mod prelude {
    //! Commonly used types

    pub use crate::{
        ConstantBitRateSource, LinkConfig, LinkId, NetError, NetSimulation, NetState, QueueTracer,
        ScenarioConfig,
    };
    pub use netsim_aqm::{
        CoDelConfig, Decision, FqCoDelConfig, PieConfig, QueueConfig, QueueId, QueueLimit,
        QueuePolicyConfig, RedConfig,
    };
    pub use netsim_core::{
        Execute, Executor, FlowKey, PacketDescriptor, PacketUid, Protocol, Scheduler, SimTime,
        Simulation, SimulationConfig,
    };
    pub use netsim_flow::{FlowMetrics, FlowMonitor};
}

/// A network simulation run: the event kernel plus its [`NetState`].
pub struct NetSimulation {
    sim: Simulation<NetState>,
}

impl NetSimulation {
    pub fn new(config: SimulationConfig) -> Self {
        let state = NetState::new(config.seed);
        Self {
            sim: Simulation::with_state(config, state),
        }
    }

    /// Build every link, source and tracer a scenario describes.
    pub fn from_scenario(scenario: &ScenarioConfig) -> Result<Self, NetError> {
        scenario.validate()?;
        let mut sim = Self::new(scenario.simulation.clone());
        let mut links = HashMap::new();
        for link in &scenario.links {
            links.insert(link.name.as_str(), sim.add_link(link.clone())?);
        }
        let lookup = |name: &str| {
            links
                .get(name)
                .copied()
                .ok_or_else(|| NetError::UnknownName(name.to_string()))
        };
        for link in &scenario.links {
            if let Some(next) = &link.next {
                sim.connect(lookup(&link.name)?, lookup(next)?)?;
            }
        }
        for source in &scenario.sources {
            sim.add_source(ConstantBitRateSource {
                name: source.name.clone(),
                link: lookup(&source.link)?,
                flow_key: source.flow,
                packet_size: source.packet_size,
                rate_bps: source.rate_bps,
                start: source.start,
                stop: source.stop,
                ecn_capable: source.ecn_capable,
            })?;
        }
        for tracer in &scenario.tracers {
            let queue = sim.state().link(lookup(&tracer.link)?)?.queue;
            sim.add_queue_tracer(QueueTracer {
                name: tracer.name.clone(),
                queue,
                period: tracer.period,
                stop: tracer.stop,
            })?;
        }
        Ok(sim)
    }

    pub fn config(&self) -> &SimulationConfig {
        self.sim.config()
    }

    pub fn time(&self) -> SimTime {
        self.sim.time()
    }

    pub fn simulation(&self) -> &Simulation<NetState> {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation<NetState> {
        &mut self.sim
    }

    pub fn state(&self) -> &NetState {
        self.sim.state()
    }

    pub fn state_mut(&mut self) -> &mut NetState {
        self.sim.state_mut()
    }

    pub fn flows(&self) -> &FlowMonitor {
        &self.sim.state().flows
    }

    pub fn create_queue(&mut self, config: QueueConfig) -> Result<QueueId, NetError> {
        Ok(self.sim.state_mut().queues.create_queue(config)?)
    }

    pub fn queue_stats(&self, queue: QueueId) -> Result<QueueStats, NetError> {
        Ok(self.sim.state().queues.stats(queue)?)
    }

    /// Create a link with its own queue. The link delivers to a sink until
    /// [`connect`](Self::connect)ed onward.
    pub fn add_link(&mut self, config: LinkConfig) -> Result<LinkId, NetError> {
        config.validate()?;
        let queue = self.create_queue(config.queue)?;
        let state = self.sim.state_mut();
        let id = LinkId(state.links.len() as u32);
        info!(link = %id, name = %config.name, rate_bps = config.rate_bps, delay = %config.delay, "Link created");
        state
            .links
            .push(PointToPointLink::new(id, config.name, config.rate_bps, config.delay, queue));
        Ok(id)
    }

    /// Forward everything `from` delivers into `to`.
    pub fn connect(&mut self, from: LinkId, to: LinkId) -> Result<(), NetError> {
        let state = self.sim.state_mut();
        state.link(to)?;
        state.link_mut(from)?.next = LinkEnd::Link(to);
        Ok(())
    }

    pub fn add_source(&mut self, source: ConstantBitRateSource) -> Result<(), NetError> {
        source.validate().map_err(NetError::Configuration)?;
        self.sim.state().link(source.link)?;
        source.install(self.sim.scheduler_mut());
        Ok(())
    }

    pub fn add_queue_tracer(&mut self, tracer: QueueTracer) -> Result<(), NetError> {
        tracer.validate().map_err(NetError::Configuration)?;
        self.sim.state().queues.get(tracer.queue)?;
        tracer.install(self.sim.scheduler_mut());
        Ok(())
    }

    /// Offer a packet to a link now, from outside any callback. An unknown
    /// link or an invalid packet is rejected before anything is recorded.
    pub fn send(&mut self, link: LinkId, packet: PacketDescriptor) -> Result<Decision, NetError> {
        self.sim.state().link(link)?;
        validate_packet(&packet)?;
        let now = self.sim.time();
        let (scheduler, state) = self.parts();
        state.flows.record_tx(packet.flow_key, &packet, now);
        link::send(scheduler, state, link, packet)
    }

    fn parts(&mut self) -> (&mut Scheduler<NetState>, &mut NetState) {
        self.sim.parts_mut()
    }

    pub fn schedule<F>(&mut self, delay: SimTime, callback: F) -> EventHandle
    where
        F: FnOnce(&mut Scheduler<NetState>, &mut NetState) + 'static,
    {
        self.sim.schedule(delay, callback)
    }

    pub fn schedule_secs<F>(&mut self, delay_secs: f64, callback: F) -> Result<EventHandle, NetError>
    where
        F: FnOnce(&mut Scheduler<NetState>, &mut NetState) + 'static,
    {
        Ok(self.sim.schedule_secs(delay_secs, callback)?)
    }

    pub fn cancel(&mut self, handle: EventHandle) -> Result<bool, EventError> {
        self.sim.cancel(handle)
    }

    /// Run until no events remain or the next is due after `stop_time`.
    /// Returns the number of callbacks executed.
    pub fn run(&mut self, stop_time: Option<SimTime>) -> u64 {
        let _span = simulation_span("netsim", self.sim.seed()).entered();
        self.sim.run(stop_time)
    }

    /// Declare lost every packet in flight for longer than the flow
    /// monitor's default maximum delay.
    pub fn check_for_lost_packets(&mut self) -> usize {
        let now = self.sim.time();
        self.sim
            .state_mut()
            .flows
            .check_for_lost_packets(now, DEFAULT_MAX_DELAY)
    }

    /// Publish queue, link, component and flow counters to the metrics facade.
    pub fn publish(&self) {
        let state = self.sim.state();
        state.queues.publish_all();
        for link in state.links() {
            link.counters.publish(&link.name);
        }
        for (component, counters) in &state.counters {
            counters.publish(component);
        }
        state.flows.publish();
    }

    /// Tear the run down; see [`Simulation::destroy`]. Queues, links, flows
    /// and counters are released and packet uids restart.
    pub fn destroy(&mut self) -> bool {
        self.sim.destroy()
    }

    pub fn is_destroyed(&self) -> bool {
        self.sim.is_destroyed()
    }
}
