//! Proportional Integral controller Enhanced (RFC 8033)
//!
//! The drop probability is recomputed every `t_update` from the queueing
//! delay and its trend. Updates are applied lazily: every enqueue and
//! dequeue first replays the periodic updates that fell due since the last
//! call, against the queue contents of that interval.

use netsim_core::{PacketDescriptor, SimTime};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::config::{PieConfig, QueueLimit};
use crate::disc::{validate_packet, Decision, DiscBase, DropReason, DroppedPacket, QueueDisc, QueueStats};
use crate::error::QueueError;
use crate::fifo::PacketFifo;

const MAX_QDELAY_SECS: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct PieQueue {
    base: DiscBase,
    fifo: PacketFifo,
    config: PieConfig,
    rng: ChaCha8Rng,
    drop_prob: f64,
    qdelay_old: SimTime,
    burst_allowance: SimTime,
    next_update: SimTime,
}

impl PieQueue {
    pub fn new(limit: QueueLimit, config: PieConfig, rng: ChaCha8Rng) -> Self {
        Self {
            base: DiscBase::new(limit),
            fifo: PacketFifo::new(),
            burst_allowance: config.max_burst,
            next_update: config.t_update,
            config,
            rng,
            drop_prob: 0.0,
            qdelay_old: SimTime::zero(),
        }
    }

    pub fn config(&self) -> &PieConfig {
        &self.config
    }

    /// Drop probability as of the last applied update.
    pub fn drop_probability(&self) -> f64 {
        self.drop_prob
    }

    pub fn burst_allowance(&self) -> SimTime {
        self.burst_allowance
    }

    /// Queueing delay seen at `t`: the sojourn of the head packet.
    fn queue_delay(&self, t: SimTime) -> SimTime {
        self.fifo
            .peek()
            .map_or(SimTime::zero(), |head| head.sojourn_time(t))
    }

    fn is_settled(&self, t: SimTime) -> bool {
        self.drop_prob == 0.0
            && self.qdelay_old.is_zero()
            && self.queue_delay(t).is_zero()
            && self.burst_allowance == self.config.max_burst
    }

    fn catch_up(&mut self, now: SimTime) {
        let period = self.config.t_update;
        while self.next_update <= now {
            if self.is_settled(self.next_update) {
                // Further updates would leave the state unchanged.
                let missed = now.saturating_sub(self.next_update).as_nanos() / period.as_nanos();
                self.next_update = self.next_update + period * (missed + 1);
                break;
            }
            self.update(self.next_update);
            self.next_update = self.next_update + period;
        }
    }

    fn update(&mut self, t: SimTime) {
        let qdelay = self.queue_delay(t);
        let target = self.config.target.as_secs_f64();
        let current = qdelay.as_secs_f64();
        let old = self.qdelay_old.as_secs_f64();

        let mut p = self.config.alpha * (current - target) + self.config.beta * (current - old);
        // Auto-tune the step to the current probability scale.
        p /= match self.drop_prob {
            d if d < 0.000_001 => 2048.0,
            d if d < 0.000_01 => 512.0,
            d if d < 0.000_1 => 128.0,
            d if d < 0.001 => 32.0,
            d if d < 0.01 => 8.0,
            d if d < 0.1 => 2.0,
            _ => 1.0,
        };
        if self.drop_prob >= 0.1 && p > 0.02 {
            p = 0.02;
        }

        let mut drop_prob = self.drop_prob + p;
        if qdelay.is_zero() && self.qdelay_old.is_zero() {
            drop_prob *= 0.98;
        }
        if current > MAX_QDELAY_SECS {
            drop_prob += 0.02;
        }
        self.drop_prob = drop_prob.clamp(0.0, 1.0);

        self.burst_allowance = self.burst_allowance.saturating_sub(self.config.t_update);
        if self.drop_prob == 0.0 && current < target / 2.0 && old < target / 2.0 {
            self.burst_allowance = self.config.max_burst;
        }
        self.qdelay_old = qdelay;
        trace!(%t, qdelay = current, drop_prob = self.drop_prob, "PIE update");
    }

    fn decide(&mut self, packet: &PacketDescriptor) -> Decision {
        if !self.burst_allowance.is_zero() {
            return Decision::Enqueue;
        }
        let half_target = self.config.target.as_secs_f64() / 2.0;
        if self.qdelay_old.as_secs_f64() < half_target && self.drop_prob < 0.2 {
            return Decision::Enqueue;
        }
        if self.fifo.bytes() <= 2 * u64::from(self.config.mean_pkt_size) {
            return Decision::Enqueue;
        }
        let u: f64 = self.rng.gen();
        if u >= self.drop_prob {
            return Decision::Enqueue;
        }
        if self.config.use_ecn && packet.ecn_capable && self.drop_prob <= self.config.mark_ecn_threshold {
            Decision::Mark
        } else {
            Decision::Drop(DropReason::EarlyDrop)
        }
    }
}

impl QueueDisc for PieQueue {
    fn kind(&self) -> &'static str {
        "pie"
    }

    fn limit(&self) -> QueueLimit {
        self.base.limit
    }

    fn enqueue(&mut self, mut packet: PacketDescriptor, now: SimTime) -> Result<Decision, QueueError> {
        validate_packet(&packet)?;
        self.catch_up(now);

        let decision = if self
            .base
            .limit
            .would_overflow(self.fifo.len(), self.fifo.bytes(), packet.size_bytes)
        {
            Decision::Drop(DropReason::Overlimit)
        } else {
            self.decide(&packet)
        };

        match decision {
            Decision::Drop(reason) => self.base.drop_packet(packet, reason, now),
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
        self.catch_up(now);
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
