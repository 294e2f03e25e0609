//! The pool storage contract.

use std::sync::Arc;

use crate::handle::{HandleId, ResourceHandle};

/// Thread-safe container of pooled handles.
///
/// Each operation is individually atomic; callers never assume atomicity
/// across a sequence of calls. A handle taken with `take_one_free` is out of
/// the free set (and marked busy) until it is handed back with
/// `return_free` or dropped from the pool with `remove`.
pub trait PoolStorage<R>: Send + Sync {
    /// Add a handle to the pool. Handles that are not busy join the free set.
    fn add(&self, handle: Arc<ResourceHandle<R>>);

    /// Snapshot of every member, free or in use.
    fn all_resources(&self) -> Vec<Arc<ResourceHandle<R>>>;

    /// Take one handle out of the free set, marking it busy.
    fn take_one_free(&self) -> Option<Arc<ResourceHandle<R>>>;

    /// Take any free handle, including ones `take_one_free` holds back for
    /// another borrower. Used once the pool cannot grow.
    fn take_any_free(&self) -> Option<Arc<ResourceHandle<R>>> {
        self.take_one_free()
    }

    /// Put a handle back into the free set, clearing its busy flag.
    /// Handles that are no longer members are ignored.
    fn return_free(&self, handle: Arc<ResourceHandle<R>>);

    /// Drop a handle from the pool and destroy its resource through its
    /// allocator. Returns `false` if the handle was not a member.
    fn remove(&self, handle: &ResourceHandle<R>) -> bool;

    /// Remove and destroy every member. Returns how many were removed.
    fn remove_all(&self) -> usize;

    /// Whether the handle is still a member.
    fn contains(&self, id: HandleId) -> bool;

    /// Number of members, free or in use.
    fn size(&self) -> usize;

    /// Number of members in the free set.
    fn free_size(&self) -> usize;
}
