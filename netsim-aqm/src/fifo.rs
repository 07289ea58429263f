//! FIFO packet storage shared by every queue disc

use netsim_core::PacketDescriptor;
use std::collections::VecDeque;

/// First-in-first-out packet buffer that keeps its byte occupancy up to date.
#[derive(Debug, Clone, Default)]
pub struct PacketFifo {
    packets: VecDeque<PacketDescriptor>,
    bytes: u64,
}

impl PacketFifo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, packet: PacketDescriptor) {
        self.bytes += u64::from(packet.size_bytes);
        self.packets.push_back(packet);
    }

    pub fn pop_front(&mut self) -> Option<PacketDescriptor> {
        let packet = self.packets.pop_front()?;
        self.bytes -= u64::from(packet.size_bytes);
        Some(packet)
    }

    pub fn peek(&self) -> Option<&PacketDescriptor> {
        self.packets.front()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsim_core::{FlowKey, PacketUid, SimTime};

    fn packet(uid: u64, size: u32) -> PacketDescriptor {
        let key = FlowKey::udp_v4([10, 0, 0, 1], 1000, [10, 0, 0, 2], 9);
        PacketDescriptor::new(PacketUid(uid), size, key, SimTime::zero())
    }

    #[test]
    fn test_fifo_order_and_bytes() {
        let mut fifo = PacketFifo::new();
        assert!(fifo.is_empty());
        assert_eq!(fifo.pop_front(), None);

        fifo.push_back(packet(1, 100));
        fifo.push_back(packet(2, 250));
        assert_eq!(fifo.len(), 2);
        assert_eq!(fifo.bytes(), 350);
        assert_eq!(fifo.peek().map(|p| p.uid), Some(PacketUid(1)));

        assert_eq!(fifo.pop_front().map(|p| p.uid), Some(PacketUid(1)));
        assert_eq!(fifo.bytes(), 250);
        fifo.clear();
        assert_eq!(fifo.bytes(), 0);
        assert!(fifo.is_empty());
    }
}
