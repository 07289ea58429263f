//! JSON scenario files
//!
//! A scenario names its links, chains them, and attaches traffic sources
//! and queue tracers to them by name. Times are in nanoseconds.
//!
//! ```json
//! {
//!   "simulation": { "seed": 7 },
//!   "stop_time": 2000000000,
//!   "links": [
//!     { "name": "access", "rate_bps": 100000000, "delay": 100000, "next": "bottleneck" },
//!     { "name": "bottleneck", "rate_bps": 10000000, "delay": 5000000,
//!       "queue": { "limit": { "packets": 100 }, "policy": { "type": "codel" } } }
//!   ],
//!   "sources": [ ... ],
//!   "tracers": [ ... ]
//! }
//! ```

use netsim_aqm::QueueConfig;
use netsim_core::{FlowKey, SimTime, SimulationConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::NetError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub name: String,
    pub rate_bps: u64,
    pub delay: SimTime,
    #[serde(default)]
    pub queue: QueueConfig,
    /// Name of the link packets continue on; a sink when absent.
    #[serde(default)]
    pub next: Option<String>,
}

impl LinkConfig {
    pub fn new(name: impl Into<String>, rate_bps: u64, delay: SimTime, queue: QueueConfig) -> Self {
        Self {
            name: name.into(),
            rate_bps,
            delay,
            queue,
            next: None,
        }
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.rate_bps == 0 {
            return Err(NetError::Configuration(format!(
                "link {:?}: rate_bps must be non-zero",
                self.name
            )));
        }
        self.queue.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub link: String,
    pub flow: FlowKey,
    pub packet_size: u32,
    pub rate_bps: u64,
    #[serde(default)]
    pub start: SimTime,
    pub stop: SimTime,
    #[serde(default)]
    pub ecn_capable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerConfig {
    pub name: String,
    pub link: String,
    pub period: SimTime,
    pub stop: SimTime,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Events due after this time are left unexecuted.
    #[serde(default)]
    pub stop_time: Option<SimTime>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub tracers: Vec<TracerConfig>,
}

impl ScenarioConfig {
    pub fn from_json_str(json: &str) -> Result<Self, NetError> {
        let config: ScenarioConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, NetError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks every part on its own and every reference by name.
    pub fn validate(&self) -> Result<(), NetError> {
        let mut names = HashSet::new();
        for link in &self.links {
            link.validate()?;
            if !names.insert(link.name.as_str()) {
                return Err(NetError::Configuration(format!(
                    "duplicate link name {:?}",
                    link.name
                )));
            }
        }
        let known = |name: &str| -> Result<(), NetError> {
            if names.contains(name) {
                Ok(())
            } else {
                Err(NetError::UnknownName(name.to_string()))
            }
        };
        for link in &self.links {
            if let Some(next) = &link.next {
                known(next)?;
            }
        }
        for source in &self.sources {
            known(&source.link)?;
        }
        for tracer in &self.tracers {
            known(&tracer.link)?;
        }
        Ok(())
    }
}
