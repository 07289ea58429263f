//! Packet and byte counters shared by applications, links and queue discs.
//!
//! Counters are plain values owned by whoever records into them. They can be
//! published to the `metrics` facade for external inspection; publishing
//! never feeds back into the simulation.

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Sent / received / dropped totals, in packets and bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketCounters {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_dropped: u64,
    pub bytes_dropped: u64,
}

impl PacketCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, bytes: u32) {
        self.packets_sent += 1;
        self.bytes_sent += u64::from(bytes);
    }

    pub fn record_received(&mut self, bytes: u32) {
        self.packets_received += 1;
        self.bytes_received += u64::from(bytes);
    }

    pub fn record_dropped(&mut self, bytes: u32) {
        self.packets_dropped += 1;
        self.bytes_dropped += u64::from(bytes);
    }

    /// Packets sent but neither received nor dropped yet.
    pub fn outstanding(&self) -> u64 {
        self.packets_sent
            .saturating_sub(self.packets_received + self.packets_dropped)
    }

    pub fn merge(&mut self, other: &PacketCounters) {
        *self += *other;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Publish the totals as `netsim_*` metrics labelled with `component`.
    pub fn publish(&self, component: &str) {
        let label = component.to_string();
        counter!("netsim_packets_sent", "component" => label.clone()).absolute(self.packets_sent);
        counter!("netsim_bytes_sent", "component" => label.clone()).absolute(self.bytes_sent);
        counter!("netsim_packets_received", "component" => label.clone())
            .absolute(self.packets_received);
        counter!("netsim_bytes_received", "component" => label.clone())
            .absolute(self.bytes_received);
        counter!("netsim_packets_dropped", "component" => label.clone())
            .absolute(self.packets_dropped);
        gauge!("netsim_packets_outstanding", "component" => label).set(self.outstanding() as f64);
    }
}

impl AddAssign for PacketCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.packets_sent += rhs.packets_sent;
        self.bytes_sent += rhs.bytes_sent;
        self.packets_received += rhs.packets_received;
        self.bytes_received += rhs.bytes_received;
        self.packets_dropped += rhs.packets_dropped;
        self.bytes_dropped += rhs.bytes_dropped;
    }
}
