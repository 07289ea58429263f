//! Queueing disciplines for simulated network devices.
//!
//! Every queue disc holds [`PacketDescriptor`](netsim_core::PacketDescriptor)s
//! under a [`QueueLimit`] and decides on each arrival whether to admit, mark
//! or drop it. Active queue management policies also drop on dequeue:
//!
//! - [`TailDropQueue`]: drops arrivals that do not fit.
//! - [`RedQueue`]: random early detection on an averaged queue size, with
//!   gentle and nonlinear variants and ECN marking.
//! - [`CoDelQueue`]: controlled delay, driven by packet sojourn times.
//! - [`PieQueue`]: proportional integral controller on estimated queueing delay.
//! - [`FqCoDelQueue`]: per-flow CoDel buckets served by deficit round robin.
//!
//! Queues live in a [`QueueRegistry`] which derives each queue's random
//! stream from the run seed and the queue id, so a run replays identically.
//!
//! ```rust
//! use netsim_aqm::{QueueLimit, QueuePolicyConfig, QueueRegistry};
//! use netsim_core::{FlowKey, PacketDescriptor, PacketUid, SimTime};
//!
//! let mut queues = QueueRegistry::new(1);
//! let id = queues.create(QueueLimit::Packets(2), QueuePolicyConfig::TailDrop).unwrap();
//! let key = FlowKey::udp_v4([10, 1, 1, 1], 49153, [10, 1, 2, 2], 9);
//! for uid in 1..=3 {
//!     let packet = PacketDescriptor::new(PacketUid(uid), 1, key, SimTime::zero());
//!     queues.enqueue(id, packet, SimTime::zero()).unwrap();
//! }
//! let stats = queues.stats(id).unwrap();
//! assert_eq!(stats.occupancy_packets, 2);
//! assert_eq!(stats.drop_count, 1);
//! ```

pub mod codel;
pub mod config;
pub mod disc;
pub mod error;
pub mod fifo;
pub mod fq_codel;
pub mod pie;
pub mod red;
pub mod registry;
pub mod tail_drop;

pub use codel::CoDelQueue;
pub use config::{
    CoDelConfig, FqCoDelConfig, PieConfig, QueueConfig, QueueLimit, QueuePolicyConfig, RedConfig,
};
pub use disc::{validate_packet, Decision, DROP_LOG_CAPACITY, DropReason, DroppedPacket, QueueDisc, QueueStats};
pub use error::QueueError;
pub use fifo::PacketFifo;
pub use fq_codel::FqCoDelQueue;
pub use pie::PieQueue;
pub use red::RedQueue;
pub use registry::{build_queue_disc, QueueId, QueueRegistry};
pub use tail_drop::TailDropQueue;
