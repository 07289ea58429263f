//! JSON export and metrics publishing
//!
//! The report is the monitor's state as plain serializable data: one entry
//! per flow with its record, derived metrics and delay distribution, plus
//! the run-wide totals.

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::error::FlowError;
use crate::monitor::{AggregateStats, DelayStats, FlowMetrics, FlowMonitor, FlowRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowReportEntry {
    pub record: FlowRecord,
    pub metrics: FlowMetrics,
    pub delay: Option<DelayStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowReport {
    pub flows: Vec<FlowReportEntry>,
    pub aggregate: AggregateStats,
}

impl FlowMonitor {
    pub fn report(&self) -> FlowReport {
        let flows = self
            .flows()
            .map(|record| FlowReportEntry {
                metrics: record.metrics(),
                delay: self.delay_stats(&record.flow_key),
                record: record.clone(),
            })
            .collect();
        FlowReport {
            flows,
            aggregate: self.aggregate(),
        }
    }

    pub fn to_json(&self, pretty: bool) -> Result<String, FlowError> {
        let report = self.report();
        let json = if pretty {
            serde_json::to_string_pretty(&report)?
        } else {
            serde_json::to_string(&report)?
        };
        Ok(json)
    }

    /// Write the report to `path`, replacing any existing file.
    pub fn export_json(&self, path: impl AsRef<Path>, pretty: bool) -> Result<(), FlowError> {
        let path = path.as_ref();
        let json = self.to_json(pretty)?;
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(json.as_bytes())?;
        writer.flush()?;
        info!(path = %path.display(), flows = self.len(), "Flow statistics exported");
        Ok(())
    }

    /// Publish per-flow counters to the metrics facade, labelled by flow id.
    pub fn publish(&self) {
        for record in self.flows() {
            let flow = record.flow_id.0.to_string();
            counter!("netsim_flow_tx_packets", "flow" => flow.clone()).absolute(record.tx_packets);
            counter!("netsim_flow_rx_packets", "flow" => flow.clone()).absolute(record.rx_packets);
            counter!("netsim_flow_lost_packets", "flow" => flow.clone())
                .absolute(record.lost_packets);
            counter!("netsim_flow_rx_bytes", "flow" => flow.clone()).absolute(record.rx_bytes);
            let metrics = record.metrics();
            if let Some(throughput) = metrics.throughput_bps {
                gauge!("netsim_flow_throughput_bps", "flow" => flow.clone()).set(throughput);
            }
            if let Some(delay) = metrics.mean_delay {
                gauge!("netsim_flow_mean_delay_seconds", "flow" => flow).set(delay.as_secs_f64());
            }
        }
    }
}
