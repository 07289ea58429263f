//! Identifier newtypes shared across the kernel

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence number of a scheduled event, unique within one run.
///
/// Ids are handed out in insertion order starting at 1, which makes them the
/// FIFO tie-breaker for events due at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({})", self.0)
    }
}

/// Handle returned by `schedule`, used to cancel or query a pending event.
///
/// The handle remembers the run epoch it was issued in, so a handle that
/// survived a `destroy()` is recognised as foreign instead of aliasing an
/// event of the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    pub(crate) id: EventId,
    pub(crate) epoch: u32,
}

impl EventHandle {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Builds a handle from raw parts. Mostly useful for tests that need a
    /// handle the scheduler never issued.
    pub fn from_raw(id: u64, epoch: u32) -> Self {
        Self {
            id: EventId(id),
            epoch,
        }
    }
}

impl fmt::Display for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.epoch)
    }
}
