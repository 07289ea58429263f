//! Error types for flow statistics export

use thiserror::Error;

/// Errors produced while exporting flow statistics.
///
/// Recording and querying never fail: a flow without data yields an empty
/// [`FlowMetrics`](crate::FlowMetrics), not an error.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
