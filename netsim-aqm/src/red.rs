//! Random Early Detection
//!
//! The arrival path keeps an exponentially weighted moving average of the
//! occupancy and drops (or marks) arrivals with a probability that ramps up
//! between the two thresholds. Variants: gentle mode, the quadratic NLRED
//! ramp, count-based spacing of early drops and ECN marking.

use netsim_core::{PacketDescriptor, SimTime};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::config::{QueueLimit, RedConfig};
use crate::disc::{validate_packet, Decision, DiscBase, DropReason, DroppedPacket, QueueDisc, QueueStats};
use crate::error::QueueError;
use crate::fifo::PacketFifo;

impl RedConfig {
    /// Drop probability for an average occupancy `avg`, before count spacing.
    ///
    /// Zero at or below `min_th`, one at or above `max_th` (`2 * max_th` in
    /// gentle mode) and non-decreasing in between. With `min_th == max_th`
    /// there is no ramp: zero up to the threshold, one above it.
    pub fn drop_probability(&self, avg: f64) -> f64 {
        if avg <= self.min_th {
            return 0.0;
        }
        if avg < self.max_th {
            let fraction = (avg - self.min_th) / (self.max_th - self.min_th);
            return self.ramp(fraction);
        }
        if self.gentle && avg < 2.0 * self.max_th {
            let top = self.ramp(1.0);
            return (top + (1.0 - top) * (avg - self.max_th) / self.max_th).clamp(0.0, 1.0);
        }
        1.0
    }

    fn ramp(&self, fraction: f64) -> f64 {
        let p = if self.nlred {
            1.5 * self.max_p * fraction * fraction
        } else {
            self.max_p * fraction
        };
        p.clamp(0.0, 1.0)
    }
}

/// RED queue disc.
#[derive(Debug, Clone)]
pub struct RedQueue {
    base: DiscBase,
    fifo: PacketFifo,
    config: RedConfig,
    rng: ChaCha8Rng,
    avg: f64,
    /// Arrivals since the last early drop while in the ramp.
    count: u64,
    idle_since: Option<SimTime>,
}

impl RedQueue {
    pub fn new(limit: QueueLimit, config: RedConfig, rng: ChaCha8Rng) -> Self {
        Self {
            base: DiscBase::new(limit),
            fifo: PacketFifo::new(),
            config,
            rng,
            avg: 0.0,
            count: 0,
            idle_since: Some(SimTime::zero()),
        }
    }

    pub fn config(&self) -> &RedConfig {
        &self.config
    }

    /// Current moving average of the occupancy.
    pub fn average(&self) -> f64 {
        self.avg
    }

    fn update_average(&mut self, now: SimTime) {
        let occupancy = self.base.limit.occupancy(self.fifo.len(), self.fifo.bytes()) as f64;
        let keep = 1.0 - self.config.qw;
        if let Some(since) = self.idle_since.take() {
            if let Some(rate) = self.config.link_rate_bps {
                // Packets the link could have sent while the queue sat empty.
                let idle_secs = now.saturating_sub(since).as_secs_f64();
                let m = idle_secs * rate as f64 / (8.0 * f64::from(self.config.mean_pkt_size));
                self.avg *= keep.powf(m);
            }
        }
        self.avg = keep * self.avg + self.config.qw * occupancy;
    }

    /// Spread early drops out: the longer since the last one, the likelier the next.
    fn spaced(&self, p_b: f64) -> f64 {
        if !self.config.count_spacing {
            return p_b;
        }
        let pending = self.count as f64 * p_b;
        if pending < 1.0 {
            p_b / (1.0 - pending)
        } else {
            1.0
        }
    }

    fn decide(&mut self, packet: &PacketDescriptor) -> Decision {
        let p_b = self.config.drop_probability(self.avg);
        if p_b >= 1.0 {
            self.count = 0;
            return Decision::Drop(DropReason::ForcedDrop);
        }
        if p_b <= 0.0 {
            self.count = 0;
            return Decision::Enqueue;
        }
        self.count += 1;
        let p_a = self.spaced(p_b);
        let u: f64 = self.rng.gen();
        trace!(avg = self.avg, p_b, p_a, u, "RED early drop draw");
        if u < p_a {
            self.count = 0;
            if self.config.use_ecn && packet.ecn_capable {
                Decision::Mark
            } else {
                Decision::Drop(DropReason::EarlyDrop)
            }
        } else {
            Decision::Enqueue
        }
    }
}

impl QueueDisc for RedQueue {
    fn kind(&self) -> &'static str {
        "red"
    }

    fn limit(&self) -> QueueLimit {
        self.base.limit
    }

    fn enqueue(&mut self, mut packet: PacketDescriptor, now: SimTime) -> Result<Decision, QueueError> {
        validate_packet(&packet)?;
        self.update_average(now);

        let mut decision = self.decide(&packet);
        if !decision.is_drop()
            && self
                .base
                .limit
                .would_overflow(self.fifo.len(), self.fifo.bytes(), packet.size_bytes)
        {
            decision = Decision::Drop(DropReason::Overlimit);
        }

        match decision {
            Decision::Drop(reason) => {
                self.base.drop_packet(packet, reason, now);
                if self.fifo.is_empty() {
                    self.idle_since = Some(now);
                }
            }
            Decision::Mark => {
                self.base.mark(&mut packet);
                self.base.admit(&mut packet, now);
                self.fifo.push_back(packet);
            }
            Decision::Enqueue => {
                self.base.admit(&mut packet, now);
                self.fifo.push_back(packet);
            }
        }
        Ok(decision)
    }

    fn dequeue(&mut self, now: SimTime) -> Option<PacketDescriptor> {
        let packet = self.fifo.pop_front()?;
        self.base.departed(&packet);
        if self.fifo.is_empty() {
            self.idle_since = Some(now);
        }
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
    use rand::SeedableRng;

    fn packet(uid: u64) -> PacketDescriptor {
        let key = FlowKey::udp_v4([10, 1, 1, 1], 49153, [10, 1, 2, 2], 9);
        PacketDescriptor::new(PacketUid(uid), 1000, key, SimTime::zero())
    }

    #[test]
    fn test_probability_ramp() {
        let config = RedConfig::new(5.0, 15.0, 0.1);
        assert_eq!(config.drop_probability(0.0), 0.0);
        assert_eq!(config.drop_probability(5.0), 0.0);
        assert!((config.drop_probability(10.0) - 0.05).abs() < 1e-12);
        assert_eq!(config.drop_probability(15.0), 1.0);
        assert_eq!(config.drop_probability(100.0), 1.0);
    }

    #[test]
    fn test_equal_thresholds_have_no_ramp() {
        let config = RedConfig::new(8.0, 8.0, 0.5);
        assert_eq!(config.drop_probability(8.0), 0.0);
        assert_eq!(config.drop_probability(8.0001), 1.0);
        assert!(config.drop_probability(7.0).is_finite());
    }

    #[test]
    fn test_gentle_and_nlred() {
        let gentle = RedConfig {
            gentle: true,
            ..RedConfig::new(5.0, 15.0, 0.1)
        };
        assert!((gentle.drop_probability(15.0) - 0.1).abs() < 1e-12);
        assert!((gentle.drop_probability(22.5) - 0.55).abs() < 1e-12);
        assert_eq!(gentle.drop_probability(30.0), 1.0);

        let nlred = RedConfig {
            nlred: true,
            ..RedConfig::new(5.0, 15.0, 0.1)
        };
        // Quadratic ramp stays below the linear one in the lower half.
        assert!(nlred.drop_probability(7.0) < RedConfig::new(5.0, 15.0, 0.1).drop_probability(7.0));
    }

    #[test]
    fn test_average_follows_occupancy() {
        let config = RedConfig {
            qw: 0.5,
            ..RedConfig::new(100.0, 200.0, 0.1)
        };
        let mut queue = RedQueue::new(QueueLimit::Packets(1000), config, ChaCha8Rng::seed_from_u64(1));
        for uid in 0..4 {
            queue.enqueue(packet(uid), SimTime::zero()).unwrap();
        }
        // 0, 0.5*1, 0.5*(0.5+2), 0.5*(1.25+3)
        assert!((queue.average() - 2.125).abs() < 1e-12);
    }

    #[test]
    fn test_idle_period_decays_average() {
        let config = RedConfig {
            qw: 0.5,
            link_rate_bps: Some(8_000_000),
            mean_pkt_size: 1000,
            ..RedConfig::new(100.0, 200.0, 0.1)
        };
        let mut queue = RedQueue::new(QueueLimit::Packets(1000), config, ChaCha8Rng::seed_from_u64(1));
        for uid in 0..4 {
            queue.enqueue(packet(uid), SimTime::zero()).unwrap();
        }
        while queue.dequeue(SimTime::zero()).is_some() {}
        let before = queue.average();
        // 10 ms idle at 1000 packets/s is ten packet times.
        queue.enqueue(packet(9), SimTime::from_millis(10)).unwrap();
        assert!(queue.average() < before * 0.5f64.powi(10));
    }

    #[test]
    fn test_forced_drop_above_max_threshold() {
        let config = RedConfig {
            qw: 1.0,
            ..RedConfig::new(1.0, 3.0, 0.1)
        };
        let mut queue = RedQueue::new(QueueLimit::Packets(100), config, ChaCha8Rng::seed_from_u64(7));
        let mut decisions = Vec::new();
        for uid in 0..20 {
            decisions.push(queue.enqueue(packet(uid), SimTime::zero()).unwrap());
        }
        assert_eq!(decisions[0], Decision::Enqueue);
        assert_eq!(decisions[1], Decision::Enqueue);
        assert!(decisions.contains(&Decision::Drop(DropReason::ForcedDrop)));
        assert!(queue.stats().forced_drops > 0);
        assert!(queue.len() <= 3);
    }

    #[test]
    fn test_ecn_capable_packets_are_marked() {
        let config = RedConfig {
            qw: 1.0,
            max_p: 1.0,
            use_ecn: true,
            count_spacing: false,
            ..RedConfig::new(0.0, 1000.0, 1.0)
        };
        let mut queue = RedQueue::new(QueueLimit::Packets(2000), config, ChaCha8Rng::seed_from_u64(3));
        let mut marks = 0;
        for uid in 0..500 {
            let decision = queue.enqueue(packet(uid).with_ecn(), SimTime::zero()).unwrap();
            assert!(!decision.is_drop());
            if decision == Decision::Mark {
                marks += 1;
            }
        }
        assert!(marks > 0);
        assert_eq!(queue.stats().mark_count, marks);
        assert_eq!(queue.stats().drop_count, 0);
        let head = queue.dequeue(SimTime::zero()).unwrap();
        assert!(!head.ce_marked);
    }
}
