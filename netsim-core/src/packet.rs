//! Packet descriptors and flow classification keys.
//!
//! The kernel never looks at payloads. A packet is a descriptor carrying its
//! size, the flow it belongs to, the time it entered its current queue and a
//! run-unique sequence number.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use crate::SimTime;

/// Transport protocol of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other(u8),
}

impl Protocol {
    /// IANA protocol number.
    pub fn number(&self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Icmp => 1,
            Protocol::Other(n) => *n,
        }
    }
}

/// Five-tuple identifying a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
}

impl FlowKey {
    pub fn new(src: IpAddr, dst: IpAddr, src_port: u16, dst_port: u16, protocol: Protocol) -> Self {
        Self {
            src,
            dst,
            src_port,
            dst_port,
            protocol,
        }
    }

    /// UDP flow between two IPv4 hosts.
    pub fn udp_v4(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> Self {
        Self::new(
            IpAddr::V4(Ipv4Addr::from(src)),
            IpAddr::V4(Ipv4Addr::from(dst)),
            src_port,
            dst_port,
            Protocol::Udp,
        )
    }

    /// TCP flow between two IPv4 hosts.
    pub fn tcp_v4(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            ..Self::udp_v4(src, src_port, dst, dst_port)
        }
    }

    /// The key of the reverse direction (e.g. ACKs of a TCP flow).
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }

    /// Stable byte encoding, used for hashing flows into buckets.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(37);
        for addr in [self.src, self.dst] {
            match addr {
                IpAddr::V4(v4) => bytes.extend_from_slice(&v4.octets()),
                IpAddr::V6(v6) => bytes.extend_from_slice(&v6.octets()),
            }
        }
        bytes.extend_from_slice(&self.src_port.to_be_bytes());
        bytes.extend_from_slice(&self.dst_port.to_be_bytes());
        bytes.push(self.protocol.number());
        bytes
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({:?})",
            self.src, self.src_port, self.dst, self.dst_port, self.protocol
        )
    }
}

/// Run-unique packet sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PacketUid(pub u64);

impl fmt::Display for PacketUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet({})", self.0)
    }
}

/// Transient description of one packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketDescriptor {
    pub uid: PacketUid,
    pub size_bytes: u32,
    pub flow_key: FlowKey,
    /// Time the packet entered the queue currently holding it; queue discs
    /// overwrite it on enqueue.
    pub enqueue_time: SimTime,
    /// Sender declared ECN capability (ECT codepoint).
    pub ecn_capable: bool,
    /// Congestion Experienced was set by some AQM on the path.
    pub ce_marked: bool,
}

impl PacketDescriptor {
    pub fn new(uid: PacketUid, size_bytes: u32, flow_key: FlowKey, enqueue_time: SimTime) -> Self {
        Self {
            uid,
            size_bytes,
            flow_key,
            enqueue_time,
            ecn_capable: false,
            ce_marked: false,
        }
    }

    pub fn with_ecn(mut self) -> Self {
        self.ecn_capable = true;
        self
    }

    /// Time spent in the current queue as of `now`.
    pub fn sojourn_time(&self, now: SimTime) -> SimTime {
        now.saturating_sub(self.enqueue_time)
    }
}

/// Hands out run-unique packet uids.
#[derive(Debug, Default, Clone)]
pub struct PacketUidAllocator {
    next: u64,
}

impl PacketUidAllocator {
    pub fn next_uid(&mut self) -> PacketUid {
        self.next += 1;
        PacketUid(self.next)
    }

    /// Number of uids handed out so far.
    pub fn issued(&self) -> u64 {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_flow_key_reverse_and_bytes() {
        let key = FlowKey::tcp_v4([10, 1, 1, 1], 49153, [10, 1, 2, 2], 5001);
        let back = key.reversed();
        assert_eq!(back.src_port, 5001);
        assert_eq!(back.reversed(), key);
        assert_eq!(key.to_bytes().len(), 13);
        assert_ne!(key.to_bytes(), back.to_bytes());

        let v6 = FlowKey::new(
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            1,
            2,
            Protocol::Udp,
        );
        assert_eq!(v6.to_bytes().len(), 37);
    }

    #[test]
    fn test_uid_allocator() {
        let mut uids = PacketUidAllocator::default();
        assert_eq!(uids.next_uid(), PacketUid(1));
        assert_eq!(uids.next_uid(), PacketUid(2));
        uids.reset();
        assert_eq!(uids.next_uid(), PacketUid(1));
    }

    #[test]
    fn test_sojourn_time() {
        let key = FlowKey::udp_v4([10, 0, 0, 1], 9, [10, 0, 0, 2], 9);
        let pkt = PacketDescriptor::new(PacketUid(1), 100, key, SimTime::from_millis(5));
        assert_eq!(pkt.sojourn_time(SimTime::from_millis(12)), SimTime::from_millis(7));
        assert_eq!(pkt.sojourn_time(SimTime::from_millis(1)), SimTime::zero());
    }
}
