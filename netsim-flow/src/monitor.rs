//! Per-flow accounting
//!
//! The [`FlowMonitor`] classifies send, receive and drop events by flow key
//! and keeps one [`FlowRecord`] per flow. Derived metrics are computed on
//! demand by [`FlowMonitor::query`].

use hdrhistogram::Histogram;
use netsim_core::{flow_span, FlowKey, PacketDescriptor, PacketUid, SimTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, trace, warn};

/// Packets in flight longer than this are declared lost by default.
pub const DEFAULT_MAX_DELAY: SimTime = SimTime::from_secs(10);

/// Flow number, assigned in order of first observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(pub u32);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flow({})", self.0)
    }
}

/// How a packet came to be counted as lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossCause {
    /// Reported through [`FlowMonitor::record_loss`].
    Reported,
    /// Discarded by a queue on the path.
    Dropped,
    /// In flight for longer than the maximum delay.
    Expired,
}

/// Accumulated counters and timestamps of one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: FlowId,
    pub flow_key: FlowKey,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub lost_bytes: u64,
    pub delay_sum: SimTime,
    /// Sum of |delay - previous delay| over consecutive receptions.
    pub jitter_sum: SimTime,
    pub last_delay: Option<SimTime>,
    pub first_tx_time: Option<SimTime>,
    pub last_tx_time: Option<SimTime>,
    pub first_rx_time: Option<SimTime>,
    pub last_rx_time: Option<SimTime>,
    pub losses: BTreeMap<LossCause, u64>,
}

impl FlowRecord {
    fn new(flow_id: FlowId, flow_key: FlowKey) -> Self {
        Self {
            flow_id,
            flow_key,
            tx_packets: 0,
            tx_bytes: 0,
            rx_packets: 0,
            rx_bytes: 0,
            lost_packets: 0,
            lost_bytes: 0,
            delay_sum: SimTime::zero(),
            jitter_sum: SimTime::zero(),
            last_delay: None,
            first_tx_time: None,
            last_tx_time: None,
            first_rx_time: None,
            last_rx_time: None,
            losses: BTreeMap::new(),
        }
    }

    pub fn losses_by(&self, cause: LossCause) -> u64 {
        self.losses.get(&cause).copied().unwrap_or(0)
    }

    /// Derived metrics; every field is `None` when its denominator is zero.
    pub fn metrics(&self) -> FlowMetrics {
        let throughput_bps = match (self.first_tx_time, self.last_rx_time) {
            (Some(first_tx), Some(last_rx)) if last_rx > first_tx => {
                Some(self.rx_bytes as f64 * 8.0 / (last_rx - first_tx).as_secs_f64())
            }
            _ => None,
        };
        let mean_delay = (self.rx_packets > 0)
            .then(|| SimTime::from_nanos(self.delay_sum.as_nanos() / self.rx_packets));
        let mean_jitter = (self.rx_packets > 1)
            .then(|| SimTime::from_nanos(self.jitter_sum.as_nanos() / (self.rx_packets - 1)));
        let loss_ratio =
            (self.tx_packets > 0).then(|| self.lost_packets as f64 / self.tx_packets as f64);
        FlowMetrics {
            throughput_bps,
            mean_delay,
            mean_jitter,
            loss_ratio,
        }
    }

    fn count_loss(&mut self, cause: LossCause, bytes: u32) {
        self.lost_packets += 1;
        self.lost_bytes += u64::from(bytes);
        *self.losses.entry(cause).or_insert(0) += 1;
    }
}

/// Throughput, delay and loss of a flow. `None` means "no data".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowMetrics {
    pub throughput_bps: Option<f64>,
    pub mean_delay: Option<SimTime>,
    pub mean_jitter: Option<SimTime>,
    pub loss_ratio: Option<f64>,
}

impl FlowMetrics {
    /// The result for a flow nothing was recorded for.
    pub const NO_DATA: FlowMetrics = FlowMetrics {
        throughput_bps: None,
        mean_delay: None,
        mean_jitter: None,
        loss_ratio: None,
    };

    pub fn is_no_data(&self) -> bool {
        *self == Self::NO_DATA
    }
}

/// Delay distribution of a flow's received packets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayStats {
    pub count: u64,
    pub min: SimTime,
    pub mean: SimTime,
    pub p50: SimTime,
    pub p95: SimTime,
    pub p99: SimTime,
    pub max: SimTime,
}

/// Totals across all flows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub flows: usize,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub in_flight_packets: u64,
    pub mean_delay: Option<SimTime>,
    pub loss_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    flow: FlowId,
    sent: SimTime,
    size_bytes: u32,
}

struct FlowEntry {
    record: FlowRecord,
    in_flight: u64,
    delays: Option<Histogram<u64>>,
}

impl FlowEntry {
    fn new(record: FlowRecord) -> Self {
        let delays = Histogram::new(3)
            .map_err(|e| warn!(flow = %record.flow_id, "Delay histogram unavailable: {}", e))
            .ok();
        Self {
            record,
            in_flight: 0,
            delays,
        }
    }
}

/// Flow statistics for one simulation run.
#[derive(Default)]
pub struct FlowMonitor {
    flows: Vec<FlowEntry>,
    index: HashMap<FlowKey, FlowId>,
    in_flight: BTreeMap<PacketUid, InFlight>,
    /// Uids already declared lost by `check_for_lost_packets`; a late
    /// reception or drop of one of them is not counted again.
    expired: BTreeSet<PacketUid>,
}

impl fmt::Debug for FlowMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowMonitor")
            .field("flows", &self.flows.len())
            .field("in_flight", &self.in_flight.len())
            .field("expired", &self.expired.len())
            .finish()
    }
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, key: FlowKey) -> FlowId {
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = FlowId(self.flows.len() as u32);
        debug!(flow = %id, %key, "New flow");
        self.flows.push(FlowEntry::new(FlowRecord::new(id, key)));
        self.index.insert(key, id);
        id
    }

    fn flow_mut(&mut self, id: FlowId) -> &mut FlowEntry {
        &mut self.flows[id.0 as usize]
    }

    /// A packet of the flow left its sender at `now`.
    pub fn record_tx(&mut self, key: FlowKey, packet: &PacketDescriptor, now: SimTime) -> FlowId {
        let id = self.entry(key);
        let _span = flow_span(id.0).entered();
        let entry = self.flow_mut(id);
        entry.record.tx_packets += 1;
        entry.record.tx_bytes += u64::from(packet.size_bytes);
        entry.record.first_tx_time.get_or_insert(now);
        entry.record.last_tx_time = Some(now);
        entry.in_flight += 1;
        self.expired.remove(&packet.uid);

        let previous = self.in_flight.insert(
            packet.uid,
            InFlight {
                flow: id,
                sent: now,
                size_bytes: packet.size_bytes,
            },
        );
        if let Some(previous) = previous {
            // Retransmission under the same uid: the older copy is superseded.
            self.flow_mut(previous.flow).in_flight -= 1;
        }
        trace!(uid = %packet.uid, size = packet.size_bytes, "Tx");
        id
    }

    /// A packet of the flow sent at `sent_time` arrived at `now`.
    ///
    /// Arrivals of packets already declared lost by
    /// [`check_for_lost_packets`](Self::check_for_lost_packets) are ignored.
    pub fn record_rx(
        &mut self,
        key: FlowKey,
        packet: &PacketDescriptor,
        sent_time: SimTime,
        now: SimTime,
    ) -> FlowId {
        let id = self.entry(key);
        let _span = flow_span(id.0).entered();
        if self.expired.remove(&packet.uid) {
            debug!(uid = %packet.uid, "Late arrival of a packet already declared lost");
            return id;
        }
        if let Some(tracked) = self.in_flight.remove(&packet.uid) {
            self.flow_mut(tracked.flow).in_flight -= 1;
        }

        let delay = now.saturating_sub(sent_time);
        let entry = self.flow_mut(id);
        let record = &mut entry.record;
        record.rx_packets += 1;
        record.rx_bytes += u64::from(packet.size_bytes);
        record.delay_sum = record.delay_sum + delay;
        if let Some(last) = record.last_delay {
            let variation = if delay > last { delay - last } else { last - delay };
            record.jitter_sum = record.jitter_sum.add_duration(variation);
        }
        record.last_delay = Some(delay);
        record.first_rx_time.get_or_insert(now);
        record.last_rx_time = Some(now);
        if let Some(delays) = entry.delays.as_mut() {
            delays.saturating_record(delay.as_nanos());
        }
        trace!(uid = %packet.uid, %delay, "Rx");
        id
    }

    /// Count one lost packet of the flow.
    pub fn record_loss(&mut self, key: FlowKey) -> FlowId {
        let id = self.entry(key);
        self.flow_mut(id).record.count_loss(LossCause::Reported, 0);
        id
    }

    /// A queue on the path discarded the packet.
    pub fn record_drop(&mut self, key: FlowKey, packet: &PacketDescriptor) -> FlowId {
        let id = self.entry(key);
        if self.expired.remove(&packet.uid) {
            return id;
        }
        if let Some(tracked) = self.in_flight.remove(&packet.uid) {
            self.flow_mut(tracked.flow).in_flight -= 1;
        }
        self.flow_mut(id)
            .record
            .count_loss(LossCause::Dropped, packet.size_bytes);
        trace!(flow = %id, uid = %packet.uid, "Drop");
        id
    }

    /// Declare lost every packet in flight for longer than `max_delay`.
    /// Returns how many were declared lost.
    pub fn check_for_lost_packets(&mut self, now: SimTime, max_delay: SimTime) -> usize {
        let expired: Vec<PacketUid> = self
            .in_flight
            .iter()
            .filter(|(_, tracked)| now.saturating_sub(tracked.sent) > max_delay)
            .map(|(uid, _)| *uid)
            .collect();
        for uid in &expired {
            if let Some(tracked) = self.in_flight.remove(uid) {
                let entry = self.flow_mut(tracked.flow);
                entry.in_flight -= 1;
                entry.record.count_loss(LossCause::Expired, tracked.size_bytes);
                self.expired.insert(*uid);
            }
        }
        if !expired.is_empty() {
            info!(%now, lost = expired.len(), "Packets declared lost");
        }
        expired.len()
    }

    /// Transmission time of a packet still in flight.
    pub fn sent_time(&self, uid: PacketUid) -> Option<SimTime> {
        self.in_flight.get(&uid).map(|tracked| tracked.sent)
    }

    pub fn flow_id(&self, key: &FlowKey) -> Option<FlowId> {
        self.index.get(key).copied()
    }

    pub fn record(&self, key: &FlowKey) -> Option<&FlowRecord> {
        self.flow_id(key).and_then(|id| self.record_by_id(id))
    }

    pub fn record_by_id(&self, id: FlowId) -> Option<&FlowRecord> {
        self.flows.get(id.0 as usize).map(|entry| &entry.record)
    }

    /// Derived metrics of a flow; [`FlowMetrics::NO_DATA`] for unknown flows.
    pub fn query(&self, key: &FlowKey) -> FlowMetrics {
        self.record(key)
            .map_or(FlowMetrics::NO_DATA, FlowRecord::metrics)
    }

    /// Packets of the flow sent but not yet received, dropped or expired.
    pub fn in_flight(&self, key: &FlowKey) -> u64 {
        self.flow_id(key)
            .map_or(0, |id| self.flows[id.0 as usize].in_flight)
    }

    /// Every flow record, in order of first observation. Each call starts a
    /// fresh enumeration.
    pub fn flows(&self) -> impl Iterator<Item = &FlowRecord> + '_ {
        self.flows.iter().map(|entry| &entry.record)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn delay_stats(&self, key: &FlowKey) -> Option<DelayStats> {
        let id = self.flow_id(key)?;
        let delays = self.flows[id.0 as usize].delays.as_ref()?;
        if delays.is_empty() {
            return None;
        }
        Some(DelayStats {
            count: delays.len(),
            min: SimTime::from_nanos(delays.min()),
            mean: SimTime::from_nanos(delays.mean() as u64),
            p50: SimTime::from_nanos(delays.value_at_quantile(0.5)),
            p95: SimTime::from_nanos(delays.value_at_quantile(0.95)),
            p99: SimTime::from_nanos(delays.value_at_quantile(0.99)),
            max: SimTime::from_nanos(delays.max()),
        })
    }

    pub fn aggregate(&self) -> AggregateStats {
        let mut totals = AggregateStats {
            flows: self.flows.len(),
            in_flight_packets: self.in_flight.len() as u64,
            ..AggregateStats::default()
        };
        let mut delay_sum: u128 = 0;
        for record in self.flows() {
            totals.tx_packets += record.tx_packets;
            totals.tx_bytes += record.tx_bytes;
            totals.rx_packets += record.rx_packets;
            totals.rx_bytes += record.rx_bytes;
            totals.lost_packets += record.lost_packets;
            delay_sum += u128::from(record.delay_sum.as_nanos());
        }
        if totals.rx_packets > 0 {
            totals.mean_delay = Some(SimTime::from_nanos(
                (delay_sum / u128::from(totals.rx_packets)) as u64,
            ));
        }
        if totals.tx_packets > 0 {
            totals.loss_ratio = Some(totals.lost_packets as f64 / totals.tx_packets as f64);
        }
        totals
    }

    /// Forget every flow; ids restart from zero.
    pub fn reset(&mut self) {
        self.flows.clear();
        self.index.clear();
        self.in_flight.clear();
        self.expired.clear();
    }
}
