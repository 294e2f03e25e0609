//! Per-sweep pool property snapshots.

use std::time::Duration;

/// Read-mostly view of a pool's sizing configuration.
///
/// Configuration may be hot-reloaded, but a sweep reads one snapshot and
/// treats it as immutable until it finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolProperties {
    /// Minimum number of live resources the pool maintains at rest.
    pub steady_pool_size: usize,
    /// Upper bound on live resources (enforced on borrow, not by the resizer).
    pub max_pool_size: usize,
    /// Maximum number of resources removed in one scale-down pass.
    pub resize_quantity: usize,
    /// How long a free resource may sit unused before it may be evicted.
    pub idle_timeout: Duration,
    /// Borrowers currently blocked waiting for a resource.
    pub wait_queue_length: usize,
    /// Re-validate idle resources up to the steady size instead of recreating them.
    pub prefer_validate_over_recreate: bool,
}

/// Source of pool property snapshots.
pub trait PropertiesSource: Send + Sync {
    fn properties(&self) -> PoolProperties;
}

impl PropertiesSource for PoolProperties {
    fn properties(&self) -> PoolProperties {
        *self
    }
}
