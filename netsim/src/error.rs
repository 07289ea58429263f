use netsim_aqm::QueueError;
use netsim_core::{EventError, SimError};
use netsim_flow::FlowError;
use thiserror::Error;

use crate::link::LinkId;

/// Errors surfaced by the network simulation facade.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Simulation error: {0}")]
    Sim(#[from] SimError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Flow statistics error: {0}")]
    Flow(#[from] FlowError),

    #[error("Unknown link: {0}")]
    UnknownLink(LinkId),

    #[error("No component named {0:?}")]
    UnknownName(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Malformed scenario: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
