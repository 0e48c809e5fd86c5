//! Opaque task handles

use std::fmt;

/// Opaque reference to a unit of work scheduled on an event loop.
///
/// Handles are issued by the loop in strictly increasing order and are never
/// reused. The issuing loop is recorded alongside the id so that a handle
/// presented to a different loop can be rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle {
    loop_id: u32,
    id: u64,
}

impl TaskHandle {
    /// Create a handle from its raw parts.
    ///
    /// Only event loops should mint handles; collaborators receive them.
    pub fn from_raw(loop_id: u32, id: u64) -> Self {
        Self { loop_id, id }
    }

    /// Id of the loop that issued this handle
    pub fn loop_id(self) -> u32 {
        self.loop_id
    }

    /// Numeric id within the issuing loop
    pub fn as_u64(self) -> u64 {
        self.id
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}.{}", self.loop_id, self.id)
    }
}
