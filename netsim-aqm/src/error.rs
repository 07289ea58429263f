//! Error types for queue discs

use netsim_core::PacketUid;
use thiserror::Error;

use crate::registry::QueueId;

/// Errors related to queue operations.
///
/// Drops and marks are not errors; they are reported through
/// [`Decision`](crate::Decision) and [`QueueStats`](crate::QueueStats).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Invalid packet {uid}: size must be non-zero")]
    InvalidPacket { uid: PacketUid },

    #[error("Unknown queue: {0}")]
    UnknownQueue(QueueId),

    #[error("Invalid queue configuration: {0}")]
    InvalidConfiguration(String),
}
