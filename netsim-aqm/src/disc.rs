//! The queue disc interface and the bookkeeping shared by every policy

use metrics::{counter, gauge};
use netsim_core::{PacketDescriptor, SimTime};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::config::QueueLimit;
use crate::error::QueueError;

/// Most drops a queue keeps for [`QueueDisc::take_dropped`]; older entries
/// are discarded once the log is full. Drop counters are not affected.
pub const DROP_LOG_CAPACITY: usize = 1024;

/// Outcome of an enqueue for the arriving packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// The packet was queued unchanged.
    Enqueue,
    /// The packet was queued with Congestion Experienced set.
    Mark,
    /// The packet was discarded.
    Drop(DropReason),
}

impl Decision {
    pub fn is_drop(&self) -> bool {
        matches!(self, Decision::Drop(_))
    }
}

/// Why a queue discarded a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The queue was full.
    Overlimit,
    /// Probabilistic drop by RED or PIE.
    EarlyDrop,
    /// RED average above the maximum threshold.
    ForcedDrop,
    /// CoDel found a standing queue.
    Sojourn,
}

/// A packet a queue discarded, kept until the owner collects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedPacket {
    pub packet: PacketDescriptor,
    pub reason: DropReason,
    pub time: SimTime,
}

/// Read-only snapshot of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued_packets: u64,
    pub enqueued_bytes: u64,
    pub dequeued_packets: u64,
    pub dequeued_bytes: u64,
    pub drop_count: u64,
    pub dropped_bytes: u64,
    pub mark_count: u64,
    pub occupancy_packets: u64,
    pub occupancy_bytes: u64,
    pub overlimit_drops: u64,
    pub early_drops: u64,
    pub forced_drops: u64,
    pub sojourn_drops: u64,
}

impl QueueStats {
    pub fn drops_for(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::Overlimit => self.overlimit_drops,
            DropReason::EarlyDrop => self.early_drops,
            DropReason::ForcedDrop => self.forced_drops,
            DropReason::Sojourn => self.sojourn_drops,
        }
    }

    /// Publish to the metrics facade, labelled with the queue name.
    pub fn publish(&self, queue: &str) {
        let label = queue.to_string();
        counter!("netsim_queue_enqueued_packets", "queue" => label.clone())
            .absolute(self.enqueued_packets);
        counter!("netsim_queue_dequeued_packets", "queue" => label.clone())
            .absolute(self.dequeued_packets);
        counter!("netsim_queue_drops", "queue" => label.clone()).absolute(self.drop_count);
        counter!("netsim_queue_marks", "queue" => label.clone()).absolute(self.mark_count);
        gauge!("netsim_queue_occupancy_packets", "queue" => label.clone())
            .set(self.occupancy_packets as f64);
        gauge!("netsim_queue_occupancy_bytes", "queue" => label).set(self.occupancy_bytes as f64);
    }
}

/// A queueing discipline: a bounded packet buffer plus a drop/mark policy.
///
/// Drops are policy outcomes, never errors. They show up in the returned
/// [`Decision`], in [`QueueDisc::stats`] and in [`QueueDisc::take_dropped`].
pub trait QueueDisc {
    /// Short policy name, e.g. `"red"`.
    fn kind(&self) -> &'static str;

    fn limit(&self) -> QueueLimit;

    /// Offer a packet to the queue at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidPacket`] for zero-size packets; the queue
    /// is left untouched.
    fn enqueue(&mut self, packet: PacketDescriptor, now: SimTime) -> Result<Decision, QueueError>;

    /// Remove the next packet to transmit. Policies that drop on dequeue may
    /// discard packets before returning one.
    fn dequeue(&mut self, now: SimTime) -> Option<PacketDescriptor>;

    /// Number of queued packets.
    fn len(&self) -> usize;

    /// Number of queued bytes.
    fn byte_len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> QueueStats;

    /// Drain the packets dropped since the last call, oldest first. At most
    /// [`DROP_LOG_CAPACITY`] of the most recent drops are kept.
    fn take_dropped(&mut self) -> Vec<DroppedPacket>;

    /// Occupancy in the unit of the limit.
    fn occupancy(&self) -> u64 {
        self.limit().occupancy(self.len(), self.byte_len())
    }
}

/// Rejects packets no queue disc accepts.
pub fn validate_packet(packet: &PacketDescriptor) -> Result<(), QueueError> {
    if packet.size_bytes == 0 {
        return Err(QueueError::InvalidPacket { uid: packet.uid });
    }
    Ok(())
}

/// Counters and drop log every policy keeps.
#[derive(Debug, Clone)]
pub(crate) struct DiscBase {
    pub(crate) limit: QueueLimit,
    stats: QueueStats,
    dropped: VecDeque<DroppedPacket>,
    log_overflowed: bool,
}

impl DiscBase {
    pub(crate) fn new(limit: QueueLimit) -> Self {
        Self {
            limit,
            stats: QueueStats::default(),
            dropped: VecDeque::new(),
            log_overflowed: false,
        }
    }

    /// Stamp the packet with its enqueue time and count it in.
    pub(crate) fn admit(&mut self, packet: &mut PacketDescriptor, now: SimTime) {
        packet.enqueue_time = now;
        self.stats.enqueued_packets += 1;
        self.stats.enqueued_bytes += u64::from(packet.size_bytes);
    }

    /// Take back an [`admit`](Self::admit) whose packet was dropped before
    /// the enqueue returned, so only admitted arrivals count as enqueued.
    pub(crate) fn revoke_admission(&mut self, size_bytes: u32) {
        self.stats.enqueued_packets -= 1;
        self.stats.enqueued_bytes -= u64::from(size_bytes);
    }

    pub(crate) fn mark(&mut self, packet: &mut PacketDescriptor) {
        packet.ce_marked = true;
        self.stats.mark_count += 1;
        debug!(uid = %packet.uid, "Packet marked");
    }

    pub(crate) fn departed(&mut self, packet: &PacketDescriptor) {
        self.stats.dequeued_packets += 1;
        self.stats.dequeued_bytes += u64::from(packet.size_bytes);
    }

    pub(crate) fn drop_packet(&mut self, packet: PacketDescriptor, reason: DropReason, now: SimTime) {
        self.stats.drop_count += 1;
        self.stats.dropped_bytes += u64::from(packet.size_bytes);
        match reason {
            DropReason::Overlimit => self.stats.overlimit_drops += 1,
            DropReason::EarlyDrop => self.stats.early_drops += 1,
            DropReason::ForcedDrop => self.stats.forced_drops += 1,
            DropReason::Sojourn => self.stats.sojourn_drops += 1,
        }
        debug!(uid = %packet.uid, ?reason, "Packet dropped");
        if self.dropped.len() == DROP_LOG_CAPACITY {
            self.dropped.pop_front();
            if !self.log_overflowed {
                self.log_overflowed = true;
                warn!(capacity = DROP_LOG_CAPACITY, "Drop log full, discarding oldest entries");
            }
        }
        self.dropped.push_back(DroppedPacket {
            packet,
            reason,
            time: now,
        });
    }

    pub(crate) fn snapshot(&self, packets: usize, bytes: u64) -> QueueStats {
        QueueStats {
            occupancy_packets: packets as u64,
            occupancy_bytes: bytes,
            ..self.stats
        }
    }

    pub(crate) fn take_dropped(&mut self) -> Vec<DroppedPacket> {
        self.dropped.drain(..).collect()
    }
}
