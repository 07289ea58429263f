//! Per-run table of queues
//!
//! Queues are addressed by the [`QueueId`] handed out at creation. Each
//! queue draws its randomness from its own stream, derived from the run seed
//! and its id, so adding a queue never perturbs the others.

use netsim_core::ids::{derive_seed, SEED_DOMAIN_QUEUE};
use netsim_core::logging::diagnostics;
use netsim_core::{queue_span, PacketDescriptor, SimTime};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::codel::CoDelQueue;
use crate::config::{QueueConfig, QueueLimit, QueuePolicyConfig};
use crate::disc::{Decision, DroppedPacket, QueueDisc, QueueStats};
use crate::error::QueueError;
use crate::fq_codel::FqCoDelQueue;
use crate::pie::PieQueue;
use crate::red::RedQueue;
use crate::tail_drop::TailDropQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(pub u32);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Queue({})", self.0)
    }
}

/// Build a queue disc from a validated config and its random stream.
pub fn build_queue_disc(
    config: &QueueConfig,
    rng: ChaCha8Rng,
) -> Result<Box<dyn QueueDisc>, QueueError> {
    config.validate()?;
    let limit = config.limit;
    let disc: Box<dyn QueueDisc> = match &config.policy {
        QueuePolicyConfig::TailDrop => Box::new(TailDropQueue::new(limit)),
        QueuePolicyConfig::Red(red) => Box::new(RedQueue::new(limit, red.clone(), rng)),
        QueuePolicyConfig::CoDel(codel) => Box::new(CoDelQueue::new(limit, codel.clone())),
        QueuePolicyConfig::Pie(pie) => Box::new(PieQueue::new(limit, pie.clone(), rng)),
        QueuePolicyConfig::FqCoDel(fq) => Box::new(FqCoDelQueue::new(limit, fq.clone(), rng)),
    };
    Ok(disc)
}

/// All queues of one simulation run.
pub struct QueueRegistry {
    seed: u64,
    queues: Vec<Box<dyn QueueDisc>>,
}

impl fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("seed", &self.seed)
            .field("queues", &self.queues.iter().map(|q| q.kind()).collect::<Vec<_>>())
            .finish()
    }
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new(1)
    }
}

impl QueueRegistry {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            queues: Vec::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Changes the seed used for queues created from now on.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// Create a queue.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidConfiguration`] if the config does not validate;
    /// no queue is created.
    pub fn create_queue(&mut self, config: QueueConfig) -> Result<QueueId, QueueError> {
        let id = QueueId(self.queues.len() as u32);
        let rng = ChaCha8Rng::seed_from_u64(derive_seed(self.seed, SEED_DOMAIN_QUEUE, u64::from(id.0)));
        let disc = build_queue_disc(&config, rng).inspect_err(|e| {
            diagnostics::rejected_call("create_queue", e);
        })?;
        info!(queue = %id, kind = disc.kind(), limit = ?config.limit, "Queue created");
        self.queues.push(disc);
        Ok(id)
    }

    /// Create a queue from its limit and policy.
    pub fn create(&mut self, limit: QueueLimit, policy: QueuePolicyConfig) -> Result<QueueId, QueueError> {
        self.create_queue(QueueConfig::new(limit, policy))
    }

    /// Offer a packet to a queue. Dropped packets are also logged for
    /// [`take_dropped`](Self::take_dropped); the log keeps only the latest
    /// [`DROP_LOG_CAPACITY`](crate::DROP_LOG_CAPACITY) entries, so callers
    /// that never drain it use bounded memory.
    pub fn enqueue(
        &mut self,
        id: QueueId,
        packet: PacketDescriptor,
        now: SimTime,
    ) -> Result<Decision, QueueError> {
        let queue = self.get_mut(id)?;
        let _span = queue_span(id.0, queue.kind()).entered();
        queue.enqueue(packet, now).inspect_err(|e| {
            diagnostics::rejected_call("enqueue", e);
        })
    }

    pub fn dequeue(&mut self, id: QueueId, now: SimTime) -> Result<Option<PacketDescriptor>, QueueError> {
        let queue = self.get_mut(id)?;
        let _span = queue_span(id.0, queue.kind()).entered();
        Ok(queue.dequeue(now))
    }

    pub fn stats(&self, id: QueueId) -> Result<QueueStats, QueueError> {
        Ok(self.get(id)?.stats())
    }

    pub fn take_dropped(&mut self, id: QueueId) -> Result<Vec<DroppedPacket>, QueueError> {
        Ok(self.get_mut(id)?.take_dropped())
    }

    pub fn get(&self, id: QueueId) -> Result<&dyn QueueDisc, QueueError> {
        self.queues
            .get(id.0 as usize)
            .map(|queue| &**queue)
            .ok_or(QueueError::UnknownQueue(id))
    }

    pub fn get_mut(&mut self, id: QueueId) -> Result<&mut dyn QueueDisc, QueueError> {
        match self.queues.get_mut(id.0 as usize) {
            Some(queue) => Ok(&mut **queue),
            None => Err(QueueError::UnknownQueue(id)),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = QueueId> + '_ {
        (0..self.queues.len() as u32).map(QueueId)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Drop every queue; ids restart from zero.
    pub fn clear(&mut self) {
        self.queues.clear();
    }

    /// Publish every queue's stats to the metrics facade.
    pub fn publish_all(&self) {
        for (index, queue) in self.queues.iter().enumerate() {
            queue.stats().publish(&format!("{}{}", queue.kind(), index));
        }
    }
}
