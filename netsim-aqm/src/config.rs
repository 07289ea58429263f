//! Typed queue configuration
//!
//! A queue is described by a [`QueueConfig`]: a capacity ([`QueueLimit`]) and
//! a policy variant ([`QueuePolicyConfig`]). Every policy config validates
//! itself before a queue is built from it.

use netsim_core::SimTime;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Queue capacity, counted in packets or in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueLimit {
    Packets(u32),
    Bytes(u64),
}

impl QueueLimit {
    /// Capacity in the limit's own unit.
    pub fn capacity(&self) -> u64 {
        match self {
            QueueLimit::Packets(n) => u64::from(*n),
            QueueLimit::Bytes(n) => *n,
        }
    }

    /// Occupancy of a queue holding `packets` packets and `bytes` bytes, in
    /// the limit's unit.
    pub fn occupancy(&self, packets: usize, bytes: u64) -> u64 {
        match self {
            QueueLimit::Packets(_) => packets as u64,
            QueueLimit::Bytes(_) => bytes,
        }
    }

    /// Whether adding a packet of `size_bytes` would go over the limit.
    pub fn would_overflow(&self, packets: usize, bytes: u64, size_bytes: u32) -> bool {
        match self {
            QueueLimit::Packets(n) => packets as u64 + 1 > u64::from(*n),
            QueueLimit::Bytes(n) => bytes + u64::from(size_bytes) > *n,
        }
    }

    /// Whether the queue currently holds more than the limit allows.
    pub fn is_exceeded(&self, packets: usize, bytes: u64) -> bool {
        self.occupancy(packets, bytes) > self.capacity()
    }

    fn validate(&self) -> Result<(), QueueError> {
        if self.capacity() == 0 {
            return Err(QueueError::InvalidConfiguration(
                "queue limit must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for QueueLimit {
    fn default() -> Self {
        QueueLimit::Packets(100)
    }
}

/// Random Early Detection parameters.
///
/// Thresholds are expressed in the unit of the queue's [`QueueLimit`]
/// (packets or bytes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedConfig {
    pub min_th: f64,
    pub max_th: f64,
    /// Drop probability reached at `max_th`.
    pub max_p: f64,
    /// Weight of the instantaneous occupancy in the moving average.
    pub qw: f64,
    /// Ramp from `max_p` to 1 between `max_th` and `2 * max_th` instead of
    /// dropping everything above `max_th`.
    pub gentle: bool,
    /// Quadratic instead of linear ramp between the thresholds.
    pub nlred: bool,
    /// Mark ECN-capable packets instead of dropping them early.
    pub use_ecn: bool,
    /// Spread early drops out using the count of packets since the last one.
    pub count_spacing: bool,
    /// Average packet size, used to decay the average across idle periods.
    pub mean_pkt_size: u32,
    /// Rate of the link draining the queue. The average only decays across
    /// idle periods when this is known.
    pub link_rate_bps: Option<u64>,
}

impl Default for RedConfig {
    fn default() -> Self {
        Self {
            min_th: 5.0,
            max_th: 15.0,
            max_p: 0.02,
            qw: 0.002,
            gentle: false,
            nlred: false,
            use_ecn: false,
            count_spacing: true,
            mean_pkt_size: 500,
            link_rate_bps: None,
        }
    }
}

impl RedConfig {
    pub fn new(min_th: f64, max_th: f64, max_p: f64) -> Self {
        Self {
            min_th,
            max_th,
            max_p,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if !(self.min_th.is_finite() && self.max_th.is_finite()) || self.min_th < 0.0 {
            return Err(invalid("RED thresholds must be finite and non-negative"));
        }
        if self.max_th < self.min_th {
            return Err(invalid(format!(
                "RED max_th ({}) is below min_th ({})",
                self.max_th, self.min_th
            )));
        }
        if !(0.0..=1.0).contains(&self.max_p) {
            return Err(invalid(format!("RED max_p {} outside [0, 1]", self.max_p)));
        }
        if !(self.qw > 0.0 && self.qw <= 1.0) {
            return Err(invalid(format!("RED qw {} outside (0, 1]", self.qw)));
        }
        if self.mean_pkt_size == 0 {
            return Err(invalid("RED mean_pkt_size must be non-zero"));
        }
        Ok(())
    }
}

/// Controlled Delay parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoDelConfig {
    /// Acceptable standing sojourn time.
    pub target: SimTime,
    /// Window the sojourn time must stay above `target` before dropping.
    pub interval: SimTime,
    /// Never drop while the queue holds at most this many bytes.
    pub min_bytes: u32,
    pub use_ecn: bool,
}

impl Default for CoDelConfig {
    fn default() -> Self {
        Self {
            target: SimTime::from_millis(5),
            interval: SimTime::from_millis(100),
            min_bytes: 1500,
            use_ecn: false,
        }
    }
}

impl CoDelConfig {
    pub fn new(target: SimTime, interval: SimTime) -> Self {
        Self {
            target,
            interval,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.interval.is_zero() {
            return Err(invalid("CoDel interval must be non-zero"));
        }
        if self.target > self.interval {
            return Err(invalid(format!(
                "CoDel target {} exceeds interval {}",
                self.target, self.interval
            )));
        }
        Ok(())
    }
}

/// Proportional Integral controller Enhanced parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PieConfig {
    /// Reference queueing delay.
    pub target: SimTime,
    /// Period of the drop probability update.
    pub t_update: SimTime,
    pub alpha: f64,
    pub beta: f64,
    /// Burst allowance granted while the queue is calm.
    pub max_burst: SimTime,
    /// Queues holding no more than twice this are never dropped from.
    pub mean_pkt_size: u32,
    pub use_ecn: bool,
    /// ECN-capable packets are marked instead of dropped while the drop
    /// probability stays at or below this value.
    pub mark_ecn_threshold: f64,
}

impl Default for PieConfig {
    fn default() -> Self {
        Self {
            target: SimTime::from_millis(15),
            t_update: SimTime::from_millis(15),
            alpha: 0.125,
            beta: 1.25,
            max_burst: SimTime::from_millis(150),
            mean_pkt_size: 1000,
            use_ecn: false,
            mark_ecn_threshold: 0.1,
        }
    }
}

impl PieConfig {
    pub fn new(target: SimTime, alpha: f64, beta: f64) -> Self {
        Self {
            target,
            alpha,
            beta,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.t_update.is_zero() {
            return Err(invalid("PIE t_update must be non-zero"));
        }
        if !(self.alpha.is_finite() && self.alpha >= 0.0 && self.beta.is_finite() && self.beta >= 0.0)
        {
            return Err(invalid("PIE alpha and beta must be finite and non-negative"));
        }
        if !(0.0..=1.0).contains(&self.mark_ecn_threshold) {
            return Err(invalid("PIE mark_ecn_threshold outside [0, 1]"));
        }
        Ok(())
    }
}

/// Flow-queue CoDel parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FqCoDelConfig {
    /// Bytes a bucket may send per round.
    pub quantum: u32,
    /// Number of hash buckets.
    pub flows: u32,
    /// Packets dropped at most from the fattest bucket per overlimit event.
    pub drop_batch_size: u32,
    pub codel: CoDelConfig,
}

impl Default for FqCoDelConfig {
    fn default() -> Self {
        Self {
            quantum: 1514,
            flows: 1024,
            drop_batch_size: 64,
            codel: CoDelConfig::default(),
        }
    }
}

impl FqCoDelConfig {
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.quantum == 0 {
            return Err(invalid("FqCoDel quantum must be non-zero"));
        }
        if self.flows == 0 {
            return Err(invalid("FqCoDel needs at least one flow bucket"));
        }
        if self.drop_batch_size == 0 {
            return Err(invalid("FqCoDel drop_batch_size must be non-zero"));
        }
        self.codel.validate()
    }
}

/// Drop/mark policy of a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueuePolicyConfig {
    TailDrop,
    Red(RedConfig),
    #[serde(rename = "codel")]
    CoDel(CoDelConfig),
    Pie(PieConfig),
    #[serde(rename = "fq_codel")]
    FqCoDel(FqCoDelConfig),
}

impl QueuePolicyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            QueuePolicyConfig::TailDrop => "tail_drop",
            QueuePolicyConfig::Red(_) => "red",
            QueuePolicyConfig::CoDel(_) => "codel",
            QueuePolicyConfig::Pie(_) => "pie",
            QueuePolicyConfig::FqCoDel(_) => "fq_codel",
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        match self {
            QueuePolicyConfig::TailDrop => Ok(()),
            QueuePolicyConfig::Red(config) => config.validate(),
            QueuePolicyConfig::CoDel(config) => config.validate(),
            QueuePolicyConfig::Pie(config) => config.validate(),
            QueuePolicyConfig::FqCoDel(config) => config.validate(),
        }
    }
}

impl Default for QueuePolicyConfig {
    fn default() -> Self {
        QueuePolicyConfig::TailDrop
    }
}

/// Everything needed to create a queue.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub limit: QueueLimit,
    #[serde(default)]
    pub policy: QueuePolicyConfig,
}

impl QueueConfig {
    pub fn new(limit: QueueLimit, policy: QueuePolicyConfig) -> Self {
        Self { limit, policy }
    }

    pub fn tail_drop(limit: QueueLimit) -> Self {
        Self::new(limit, QueuePolicyConfig::TailDrop)
    }

    /// FqCoDel with its customary 10240 packet limit.
    pub fn fq_codel() -> Self {
        Self::new(
            QueueLimit::Packets(10240),
            QueuePolicyConfig::FqCoDel(FqCoDelConfig::default()),
        )
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        self.limit.validate()?;
        self.policy.validate()
    }
}

fn invalid(message: impl Into<String>) -> QueueError {
    QueueError::InvalidConfiguration(message.into())
}
