use netsim_core::{PacketDescriptor, SimTime};

use crate::config::QueueLimit;
use crate::disc::{validate_packet, Decision, DiscBase, DropReason, DroppedPacket, QueueDisc, QueueStats};
use crate::error::QueueError;
use crate::fifo::PacketFifo;

/// FIFO that drops arrivals once the limit would be exceeded.
#[derive(Debug, Clone)]
pub struct TailDropQueue {
    base: DiscBase,
    fifo: PacketFifo,
}

impl TailDropQueue {
    pub fn new(limit: QueueLimit) -> Self {
        Self {
            base: DiscBase::new(limit),
            fifo: PacketFifo::new(),
        }
    }
}

impl QueueDisc for TailDropQueue {
    fn kind(&self) -> &'static str {
        "tail_drop"
    }

    fn limit(&self) -> QueueLimit {
        self.base.limit
    }

    fn enqueue(&mut self, mut packet: PacketDescriptor, now: SimTime) -> Result<Decision, QueueError> {
        validate_packet(&packet)?;
        if self
            .base
            .limit
            .would_overflow(self.fifo.len(), self.fifo.bytes(), packet.size_bytes)
        {
            self.base.drop_packet(packet, DropReason::Overlimit, now);
            return Ok(Decision::Drop(DropReason::Overlimit));
        }
        self.base.admit(&mut packet, now);
        self.fifo.push_back(packet);
        Ok(Decision::Enqueue)
    }

    fn dequeue(&mut self, _now: SimTime) -> Option<PacketDescriptor> {
        let packet = self.fifo.pop_front()?;
        self.base.departed(&packet);
        Some(packet)
    }

    fn len(&self) -> usize {
        self.fifo.len()
    }

    fn byte_len(&self) -> u64 {
        self.fifo.bytes()
    }

    fn stats(&self) -> QueueStats {
        self.base.snapshot(self.fifo.len(), self.fifo.bytes())
    }

    fn take_dropped(&mut self) -> Vec<DroppedPacket> {
        self.base.take_dropped()
    }
}
