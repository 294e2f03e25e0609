//! Point-in-time pool statistics.

use std::fmt;

/// Snapshot of a pool's occupancy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStatus {
    pub name: String,
    /// Live resources, free or borrowed.
    pub total: usize,
    pub free: usize,
    pub busy: usize,
    /// Borrowers blocked waiting for a resource.
    pub waiting: usize,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool [{}] PoolSize={}  FreeResources={}  QueueSize={}",
            self.name, self.total, self.free, self.waiting
        )
    }
}
