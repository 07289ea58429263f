//! Flow statistics for network simulations.
//!
//! A flow is the traffic of one five-tuple. The [`FlowMonitor`] is told
//! about every transmission, reception and drop and keeps per-flow counters,
//! timestamps, delay and jitter sums and a delay histogram. Throughput,
//! mean delay and loss ratio are derived on demand; a flow with nothing
//! recorded reports [`FlowMetrics::NO_DATA`] instead of dividing by zero.
//!
//! ```rust
//! use netsim_core::{FlowKey, PacketDescriptor, PacketUid, SimTime};
//! use netsim_flow::FlowMonitor;
//!
//! let mut monitor = FlowMonitor::new();
//! let key = FlowKey::udp_v4([10, 1, 1, 1], 49153, [10, 1, 2, 2], 9);
//! let packet = PacketDescriptor::new(PacketUid(1), 1000, key, SimTime::zero());
//! monitor.record_tx(key, &packet, SimTime::zero());
//! monitor.record_rx(key, &packet, SimTime::zero(), SimTime::from_secs(1));
//! assert_eq!(monitor.query(&key).throughput_bps, Some(8000.0));
//! ```

pub mod error;
pub mod export;
pub mod monitor;

pub use error::FlowError;
pub use export::{FlowReport, FlowReportEntry};
pub use monitor::{
    AggregateStats, DelayStats, FlowId, FlowMetrics, FlowMonitor, FlowRecord, LossCause, DEFAULT_MAX_DELAY,
};
