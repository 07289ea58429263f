//! Controlled Delay (RFC 8289)
//!
//! CoDel acts on dequeue. Once every packet leaving the queue has waited
//! longer than `target` for a full `interval`, it enters the dropping state
//! and drops one packet per dequeue at times spaced `interval / sqrt(count)`
//! apart, until the sojourn time falls back under `target`.

use netsim_core::{PacketDescriptor, SimTime};
use tracing::debug;

use crate::config::{CoDelConfig, QueueLimit};
use crate::disc::{validate_packet, Decision, DiscBase, DropReason, DroppedPacket, QueueDisc, QueueStats};
use crate::error::QueueError;
use crate::fifo::PacketFifo;

/// Per-queue CoDel control state. FqCoDel keeps one per bucket.
#[derive(Debug, Clone, Default)]
pub(crate) struct CoDelState {
    first_above_time: Option<SimTime>,
    drop_next: SimTime,
    count: u32,
    last_count: u32,
    dropping: bool,
}

impl CoDelState {
    pub(crate) fn is_dropping(&self) -> bool {
        self.dropping
    }

    fn control_law(&self, t: SimTime, config: &CoDelConfig) -> SimTime {
        let spacing = config.interval.as_nanos() as f64 / f64::from(self.count.max(1)).sqrt();
        t + SimTime::from_nanos(spacing as u64)
    }

    /// Pops the head and reports whether the standing queue allows a drop.
    fn pop(
        &mut self,
        fifo: &mut PacketFifo,
        config: &CoDelConfig,
        now: SimTime,
    ) -> Option<(PacketDescriptor, bool)> {
        let Some(packet) = fifo.pop_front() else {
            self.first_above_time = None;
            return None;
        };
        let sojourn = packet.sojourn_time(now);
        let ok_to_drop = if sojourn < config.target || fifo.bytes() <= u64::from(config.min_bytes) {
            self.first_above_time = None;
            false
        } else {
            match self.first_above_time {
                None => {
                    self.first_above_time = Some(now + config.interval);
                    false
                }
                Some(first_above) => now >= first_above,
            }
        };
        Some((packet, ok_to_drop))
    }

    /// Dequeue through the control law. Drops at most one packet per call;
    /// dropped and marked packets are accounted on `base`, departures are not.
    pub(crate) fn dequeue(
        &mut self,
        fifo: &mut PacketFifo,
        base: &mut DiscBase,
        config: &CoDelConfig,
        now: SimTime,
    ) -> Option<PacketDescriptor> {
        let Some((mut packet, ok_to_drop)) = self.pop(fifo, config, now) else {
            self.dropping = false;
            return None;
        };

        if self.dropping {
            if !ok_to_drop {
                self.dropping = false;
                debug!(%now, count = self.count, "CoDel leaves dropping state");
            } else if now >= self.drop_next {
                self.count += 1;
                if config.use_ecn && packet.ecn_capable {
                    base.mark(&mut packet);
                    self.drop_next = self.control_law(self.drop_next, config);
                    return Some(packet);
                }
                base.drop_packet(packet, DropReason::Sojourn, now);
                let (next, ok_to_drop) = self.pop(fifo, config, now)?;
                packet = next;
                if ok_to_drop {
                    self.drop_next = self.control_law(self.drop_next, config);
                } else {
                    self.dropping = false;
                }
            }
            return Some(packet);
        }

        if ok_to_drop {
            let delta = self.count.saturating_sub(self.last_count);
            // Resume near the previous drop rate if the last episode was recent.
            self.count = if delta > 1 && now.saturating_sub(self.drop_next) < config.interval * 16 {
                delta
            } else {
                1
            };
            self.last_count = self.count;
            self.drop_next = self.control_law(now, config);
            self.dropping = true;
            debug!(%now, count = self.count, "CoDel enters dropping state");

            if config.use_ecn && packet.ecn_capable {
                base.mark(&mut packet);
                return Some(packet);
            }
            base.drop_packet(packet, DropReason::Sojourn, now);
            let (next, _) = self.pop(fifo, config, now)?;
            packet = next;
        }
        Some(packet)
    }
}

/// Single-queue CoDel with a tail-drop limit.
#[derive(Debug, Clone)]
pub struct CoDelQueue {
    base: DiscBase,
    fifo: PacketFifo,
    config: CoDelConfig,
    state: CoDelState,
}

impl CoDelQueue {
    pub fn new(limit: QueueLimit, config: CoDelConfig) -> Self {
        Self {
            base: DiscBase::new(limit),
            fifo: PacketFifo::new(),
            config,
            state: CoDelState::default(),
        }
    }

    pub fn config(&self) -> &CoDelConfig {
        &self.config
    }

    pub fn is_dropping(&self) -> bool {
        self.state.is_dropping()
    }
}

impl QueueDisc for CoDelQueue {
    fn kind(&self) -> &'static str {
        "codel"
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

    fn dequeue(&mut self, now: SimTime) -> Option<PacketDescriptor> {
        let packet = self
            .state
            .dequeue(&mut self.fifo, &mut self.base, &self.config, now)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use netsim_core::{FlowKey, PacketUid};

    fn packet(uid: u64) -> PacketDescriptor {
        let key = FlowKey::udp_v4([10, 1, 1, 1], 49153, [10, 1, 2, 2], 9);
        PacketDescriptor::new(PacketUid(uid), 1000, key, SimTime::zero())
    }

    fn filled(count: u64, config: CoDelConfig) -> CoDelQueue {
        let mut queue = CoDelQueue::new(QueueLimit::Packets(1000), config);
        for uid in 0..count {
            queue.enqueue(packet(uid), SimTime::zero()).unwrap();
        }
        queue
    }

    #[test]
    fn test_no_drops_below_target() {
        let mut queue = filled(0, CoDelConfig::default());
        for step in 1..=50 {
            // Each packet leaves 1 ms after entering.
            let now = SimTime::from_millis(step);
            queue.enqueue(packet(100 + step), now).unwrap();
            assert!(queue.dequeue(now + SimTime::from_millis(1)).is_some());
        }
        assert_eq!(queue.stats().drop_count, 0);
    }

    #[test]
    fn test_standing_queue_drop_schedule() {
        let mut queue = filled(100, CoDelConfig::default());
        let mut previous_drops = 0;
        for step in 1..=35 {
            let now = SimTime::from_millis(10 * step);
            assert!(queue.dequeue(now).is_some());
            let drops = queue.stats().drop_count;
            assert!(drops <= previous_drops + 1, "more than one drop per dequeue");
            previous_drops = drops;
        }

        let times: Vec<SimTime> = queue.take_dropped().iter().map(|d| d.time).collect();
        // Above target for a full interval first, then interval / sqrt(count).
        assert_eq!(
            times,
            vec![
                SimTime::from_millis(110),
                SimTime::from_millis(210),
                SimTime::from_millis(290),
                SimTime::from_millis(340),
            ]
        );
        assert_eq!(queue.stats().sojourn_drops, 4);
    }

    #[test]
    fn test_min_bytes_protects_small_queue() {
        let mut queue = filled(2, CoDelConfig::default());
        assert!(queue.dequeue(SimTime::from_secs(1)).is_some());
        assert!(queue.dequeue(SimTime::from_secs(2)).is_some());
        assert!(queue.dequeue(SimTime::from_secs(3)).is_none());
        assert_eq!(queue.stats().drop_count, 0);
        assert!(!queue.is_dropping());
    }

    #[test]
    fn test_ecn_marks_instead_of_dropping() {
        let config = CoDelConfig {
            use_ecn: true,
            ..CoDelConfig::default()
        };
        let mut queue = CoDelQueue::new(QueueLimit::Packets(1000), config);
        for uid in 0..100 {
            queue.enqueue(packet(uid).with_ecn(), SimTime::zero()).unwrap();
        }
        let mut marked = 0;
        for step in 1..=30 {
            if queue.dequeue(SimTime::from_millis(10 * step)).unwrap().ce_marked {
                marked += 1;
            }
        }
        assert_eq!(queue.stats().drop_count, 0);
        assert_eq!(queue.stats().mark_count, marked);
        assert!(marked >= 2);
    }
}
