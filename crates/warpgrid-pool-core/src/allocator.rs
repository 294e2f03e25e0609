//! Collaborator traits for creating and validating pooled resources.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::PoolResult;
use crate::handle::{HandleId, ResourceHandle};

/// Creates, validates, and destroys raw resources.
///
/// Validation hooks are optional: an allocator that cannot validate keeps
/// the defaults, which report every resource as valid and never flag
/// anything in a batch check.
pub trait ResourceAllocator<R>: Send + Sync {
    /// Create one new resource.
    fn create(&self) -> anyhow::Result<R>;

    /// Whether `is_valid` performs a real check.
    fn supports_validation(&self) -> bool {
        false
    }

    /// Check a single resource.
    fn is_valid(&self, _resource: &R) -> bool {
        true
    }

    /// Batch-check free resources and return the IDs of invalid ones.
    ///
    /// Driver-level validation can be expensive, so the resizer sends all
    /// candidates of a sweep in one call.
    fn find_invalid(&self, _candidates: &[Arc<ResourceHandle<R>>]) -> anyhow::Result<HashSet<HandleId>> {
        Ok(HashSet::new())
    }

    /// Release whatever the resource holds. Called once, when the handle
    /// leaves storage.
    fn destroy(&self, _resource: &R) {}
}

/// Pool-side hooks the resizer needs to replenish and validate the pool.
pub trait ResourceHandler<R>: Send + Sync {
    /// Create one resource and add it to storage as free. Returns `false`
    /// without creating anything when the pool is already at its maximum
    /// size.
    fn create_and_add(&self) -> PoolResult<bool>;

    /// Batch-check candidates against the backing allocator.
    fn find_invalid(&self, candidates: &[Arc<ResourceHandle<R>>]) -> PoolResult<HashSet<HandleId>>;

    /// Notification that a handle was removed because it was found invalid.
    fn invalid_connection_detected(&self, handle: &ResourceHandle<R>);
}
