//! Borrowed resources.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use warpgrid_pool_core::ResourceHandle;

/// A resource checked out of a pool.
///
/// Hand it back with [`ResourcePool::release`](crate::ResourcePool::release).
/// The lease number ties it to one borrow, so a stale copy of the handle
/// cannot return a resource that has since been lent to someone else.
pub struct PooledResource<R> {
    handle: Arc<ResourceHandle<R>>,
    lease: u64,
}

impl<R> PooledResource<R> {
    pub(crate) fn new(handle: Arc<ResourceHandle<R>>, lease: u64) -> Self {
        Self { handle, lease }
    }

    pub fn handle(&self) -> &Arc<ResourceHandle<R>> {
        &self.handle
    }

    /// Which borrow of the handle this is.
    pub fn lease(&self) -> u64 {
        self.lease
    }

    pub(crate) fn into_parts(self) -> (Arc<ResourceHandle<R>>, u64) {
        (self.handle, self.lease)
    }
}

impl<R> Deref for PooledResource<R> {
    type Target = ResourceHandle<R>;

    fn deref(&self) -> &ResourceHandle<R> {
        &self.handle
    }
}

impl<R> fmt::Debug for PooledResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("handle", &self.handle.id())
            .field("lease", &self.lease)
            .finish()
    }
}
