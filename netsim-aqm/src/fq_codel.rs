//! Flow-queue CoDel
//!
//! Arrivals are hashed by flow key into buckets, each a FIFO with its own
//! CoDel state. Buckets are served by deficit round robin, newly active
//! buckets ahead of old ones. When the whole queue goes over its limit the
//! head packets of the bucket holding the most bytes are dropped.

use netsim_core::ids::fnv1a64;
use netsim_core::{FlowKey, PacketDescriptor, PacketUid, SimTime};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use crate::codel::CoDelState;
use crate::config::{FqCoDelConfig, QueueLimit};
use crate::disc::{validate_packet, Decision, DiscBase, DropReason, DroppedPacket, QueueDisc, QueueStats};
use crate::error::QueueError;
use crate::fifo::PacketFifo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowStatus {
    Inactive,
    New,
    Old,
}

#[derive(Debug, Clone)]
struct FlowBucket {
    fifo: PacketFifo,
    codel: CoDelState,
    deficit: i64,
    status: FlowStatus,
}

impl FlowBucket {
    fn new() -> Self {
        Self {
            fifo: PacketFifo::new(),
            codel: CoDelState::default(),
            deficit: 0,
            status: FlowStatus::Inactive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FqCoDelQueue {
    base: DiscBase,
    config: FqCoDelConfig,
    perturbation: u64,
    buckets: BTreeMap<u32, FlowBucket>,
    new_flows: VecDeque<u32>,
    old_flows: VecDeque<u32>,
    packets: usize,
    bytes: u64,
}

impl FqCoDelQueue {
    pub fn new(limit: QueueLimit, config: FqCoDelConfig, mut rng: ChaCha8Rng) -> Self {
        Self {
            base: DiscBase::new(limit),
            perturbation: rng.gen(),
            config,
            buckets: BTreeMap::new(),
            new_flows: VecDeque::new(),
            old_flows: VecDeque::new(),
            packets: 0,
            bytes: 0,
        }
    }

    pub fn config(&self) -> &FqCoDelConfig {
        &self.config
    }

    /// Bucket index the flow hashes to.
    pub fn bucket_of(&self, key: &FlowKey) -> u32 {
        (fnv1a64(&key.to_bytes(), self.perturbation) % u64::from(self.config.flows)) as u32
    }

    /// Buckets currently scheduled for service.
    pub fn active_buckets(&self) -> usize {
        self.new_flows.len() + self.old_flows.len()
    }

    /// Packets waiting in the bucket the flow hashes to.
    pub fn flow_backlog(&self, key: &FlowKey) -> usize {
        self.buckets
            .get(&self.bucket_of(key))
            .map_or(0, |bucket| bucket.fifo.len())
    }

    /// Drops head packets of the fattest bucket until half its backlog or a
    /// batch is gone. Returns whether `arriving` was among them.
    fn drop_from_fattest(&mut self, now: SimTime, arriving: PacketUid) -> bool {
        let Some((&index, bucket)) = self
            .buckets
            .iter_mut()
            .max_by_key(|(_, bucket)| bucket.fifo.bytes())
        else {
            return false;
        };
        let threshold = bucket.fifo.bytes() / 2;
        let mut dropped_bytes = 0;
        let mut dropped = 0;
        let mut hit_arriving = false;
        while let Some(packet) = bucket.fifo.pop_front() {
            dropped += 1;
            dropped_bytes += u64::from(packet.size_bytes);
            self.packets -= 1;
            self.bytes -= u64::from(packet.size_bytes);
            hit_arriving |= packet.uid == arriving;
            self.base.drop_packet(packet, DropReason::Overlimit, now);
            if dropped >= self.config.drop_batch_size || dropped_bytes >= threshold {
                break;
            }
        }
        debug!(bucket = index, dropped, dropped_bytes, "FqCoDel overlimit drop");
        hit_arriving
    }
}

impl QueueDisc for FqCoDelQueue {
    fn kind(&self) -> &'static str {
        "fq_codel"
    }

    fn limit(&self) -> QueueLimit {
        self.base.limit
    }

    fn enqueue(&mut self, mut packet: PacketDescriptor, now: SimTime) -> Result<Decision, QueueError> {
        validate_packet(&packet)?;
        let index = self.bucket_of(&packet.flow_key);
        let arriving = packet.uid;
        let arriving_bytes = packet.size_bytes;

        self.base.admit(&mut packet, now);
        self.packets += 1;
        self.bytes += u64::from(packet.size_bytes);
        let bucket = self.buckets.entry(index).or_insert_with(FlowBucket::new);
        bucket.fifo.push_back(packet);
        if bucket.status == FlowStatus::Inactive {
            bucket.status = FlowStatus::New;
            bucket.deficit = i64::from(self.config.quantum);
            self.new_flows.push_back(index);
        }

        let mut arriving_dropped = false;
        while self.base.limit.is_exceeded(self.packets, self.bytes) {
            arriving_dropped |= self.drop_from_fattest(now, arriving);
        }
        if arriving_dropped {
            self.base.revoke_admission(arriving_bytes);
            return Ok(Decision::Drop(DropReason::Overlimit));
        }
        Ok(Decision::Enqueue)
    }

    fn dequeue(&mut self, now: SimTime) -> Option<PacketDescriptor> {
        loop {
            let (index, from_new) = match (self.new_flows.front(), self.old_flows.front()) {
                (Some(&index), _) => (index, true),
                (None, Some(&index)) => (index, false),
                (None, None) => return None,
            };
            let Some(bucket) = self.buckets.get_mut(&index) else {
                if from_new {
                    self.new_flows.pop_front();
                } else {
                    self.old_flows.pop_front();
                }
                continue;
            };

            if bucket.deficit <= 0 {
                bucket.deficit += i64::from(self.config.quantum);
                bucket.status = FlowStatus::Old;
                if from_new {
                    self.new_flows.pop_front();
                } else {
                    self.old_flows.pop_front();
                }
                self.old_flows.push_back(index);
                continue;
            }

            let (len_before, bytes_before) = (bucket.fifo.len(), bucket.fifo.bytes());
            let packet = bucket
                .codel
                .dequeue(&mut bucket.fifo, &mut self.base, &self.config.codel, now);
            self.packets -= len_before - bucket.fifo.len();
            self.bytes -= bytes_before - bucket.fifo.bytes();

            match packet {
                Some(packet) => {
                    bucket.deficit -= i64::from(packet.size_bytes);
                    self.base.departed(&packet);
                    return Some(packet);
                }
                None => {
                    if from_new {
                        self.new_flows.pop_front();
                    } else {
                        self.old_flows.pop_front();
                    }
                    // An emptied new bucket goes round once more as old so a
                    // flow cannot stay new by sending in short bursts.
                    if from_new && !self.old_flows.is_empty() {
                        bucket.status = FlowStatus::Old;
                        self.old_flows.push_back(index);
                    } else {
                        bucket.status = FlowStatus::Inactive;
                    }
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.packets
    }

    fn byte_len(&self) -> u64 {
        self.bytes
    }

    fn stats(&self) -> QueueStats {
        self.base.snapshot(self.packets, self.bytes)
    }

    fn take_dropped(&mut self) -> Vec<DroppedPacket> {
        self.base.take_dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn queue(limit: u32) -> FqCoDelQueue {
        FqCoDelQueue::new(
            QueueLimit::Packets(limit),
            FqCoDelConfig::default(),
            ChaCha8Rng::seed_from_u64(11),
        )
    }

    fn flow(port: u16) -> FlowKey {
        FlowKey::udp_v4([10, 1, 1, 1], port, [10, 1, 2, 2], 9)
    }

    /// A second flow that lands in a different bucket than `first`.
    fn distinct_flow(queue: &FqCoDelQueue, first: &FlowKey) -> FlowKey {
        (2000..3000)
            .map(flow)
            .find(|key| queue.bucket_of(key) != queue.bucket_of(first))
            .unwrap()
    }

    fn packet(uid: u64, key: FlowKey) -> PacketDescriptor {
        PacketDescriptor::new(PacketUid(uid), 1000, key, SimTime::zero())
    }

    #[test]
    fn test_round_robin_between_flows() {
        let mut q = queue(10240);
        let heavy = flow(1000);
        let light = distinct_flow(&q, &heavy);
        for uid in 0..100 {
            q.enqueue(packet(uid, heavy), SimTime::zero()).unwrap();
        }
        for uid in 100..110 {
            q.enqueue(packet(uid, light), SimTime::zero()).unwrap();
        }
        assert_eq!(q.active_buckets(), 2);

        let mut light_served = 0;
        for _ in 0..20 {
            if q.dequeue(SimTime::zero()).unwrap().flow_key == light {
                light_served += 1;
            }
        }
        assert!((8..=12).contains(&light_served), "light flow served {light_served}");
        assert_eq!(q.len(), 90);
    }

    #[test]
    fn test_new_flow_served_first() {
        let mut q = queue(10240);
        let old = flow(1000);
        let fresh = distinct_flow(&q, &old);
        for uid in 0..10 {
            q.enqueue(packet(uid, old), SimTime::zero()).unwrap();
        }
        for _ in 0..3 {
            assert_eq!(q.dequeue(SimTime::zero()).unwrap().flow_key, old);
        }
        q.enqueue(packet(50, fresh), SimTime::zero()).unwrap();
        assert_eq!(q.dequeue(SimTime::zero()).unwrap().uid, PacketUid(50));
    }

    #[test]
    fn test_overlimit_drops_from_fattest_bucket() {
        let mut q = queue(10);
        let fat = flow(1000);
        let thin = distinct_flow(&q, &fat);
        for uid in 0..9 {
            q.enqueue(packet(uid, fat), SimTime::zero()).unwrap();
        }
        q.enqueue(packet(9, thin), SimTime::zero()).unwrap();
        assert_eq!(q.enqueue(packet(10, thin), SimTime::zero()).unwrap(), Decision::Enqueue);

        let dropped = q.take_dropped();
        assert_eq!(dropped.len(), 5);
        assert!(dropped.iter().all(|d| d.packet.flow_key == fat && d.reason == DropReason::Overlimit));
        assert_eq!(q.len(), 6);
        assert_eq!(q.flow_backlog(&fat), 4);
        assert_eq!(q.flow_backlog(&thin), 2);
        assert_eq!(q.stats().overlimit_drops, 5);
    }

    #[test]
    fn test_dropped_arrival_is_not_counted_as_enqueued() {
        let mut q = FqCoDelQueue::new(
            QueueLimit::Bytes(1000),
            FqCoDelConfig::default(),
            ChaCha8Rng::seed_from_u64(11),
        );
        let small = flow(1000);
        let large = distinct_flow(&q, &small);
        let mut first = packet(1, small);
        first.size_bytes = 100;
        assert_eq!(q.enqueue(first, SimTime::zero()).unwrap(), Decision::Enqueue);
        let mut jumbo = packet(2, large);
        jumbo.size_bytes = 1500;
        assert_eq!(
            q.enqueue(jumbo, SimTime::zero()).unwrap(),
            Decision::Drop(DropReason::Overlimit)
        );

        let stats = q.stats();
        assert_eq!(stats.enqueued_packets, 1);
        assert_eq!(stats.enqueued_bytes, 100);
        assert_eq!(stats.drop_count, 1);
        assert_eq!(stats.occupancy_bytes, 100);
    }

    #[test]
    fn test_per_bucket_codel_drops_standing_queue() {
        let mut q = queue(10240);
        let key = flow(1000);
        for uid in 0..100 {
            q.enqueue(packet(uid, key), SimTime::zero()).unwrap();
        }
        for step in 1..=30 {
            assert!(q.dequeue(SimTime::from_millis(10 * step)).is_some());
        }
        let stats = q.stats();
        assert!(stats.sojourn_drops >= 2);
        assert_eq!(
            stats.occupancy_packets,
            100 - stats.dequeued_packets - stats.drop_count
        );
    }

    #[test]
    fn test_drains_to_empty() {
        let mut q = queue(100);
        for uid in 0..20 {
            q.enqueue(packet(uid, flow(1000 + uid as u16)), SimTime::zero()).unwrap();
        }
        let mut served = 0;
        while q.dequeue(SimTime::zero()).is_some() {
            served += 1;
        }
        assert_eq!(served, 20);
        assert!(q.is_empty());
        assert_eq!(q.byte_len(), 0);
        assert_eq!(q.active_buckets(), 0);
    }
}
