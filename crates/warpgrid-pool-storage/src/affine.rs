//! Thread-affine storage.
//!
//! There is no free queue to drain: membership in the free set is simply
//! "not busy". A borrower first looks for a handle already associated with
//! its own thread, then for any unassociated handle. Associated handles go
//! to other threads once the resizer disassociates them, or earlier through
//! `take_any_free` when the pool cannot grow.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use warpgrid_pool_core::{HandleId, PoolStorage, ResourceHandle};

/// Storage for resources bound to the thread that last used them.
pub struct AffineStorage<R> {
    handles: Mutex<Vec<Arc<ResourceHandle<R>>>>,
}

impl<R> AffineStorage<R> {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<ResourceHandle<R>>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R> Default for AffineStorage<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + Sync> PoolStorage<R> for AffineStorage<R> {
    fn add(&self, handle: Arc<ResourceHandle<R>>) {
        let mut handles = self.lock();
        if !handles.iter().any(|h| h.id() == handle.id()) {
            handles.push(handle);
        }
    }

    fn all_resources(&self) -> Vec<Arc<ResourceHandle<R>>> {
        self.lock().clone()
    }

    fn take_one_free(&self) -> Option<Arc<ResourceHandle<R>>> {
        let me = thread::current().id();
        let handles = self.lock();

        // The calling thread's own handle first.
        for h in handles.iter() {
            let mut state = h.state();
            if !state.is_busy() && state.owner() == Some(me) {
                state.set_busy(true);
                return Some(Arc::clone(h));
            }
        }

        for h in handles.iter() {
            let mut state = h.state();
            if !state.is_busy() && !state.is_associated() {
                state.set_busy(true);
                state.associate_with_current_thread();
                return Some(Arc::clone(h));
            }
        }

        None
    }

    fn take_any_free(&self) -> Option<Arc<ResourceHandle<R>>> {
        if let Some(handle) = self.take_one_free() {
            return Some(handle);
        }

        let handles = self.lock();
        for h in handles.iter() {
            let mut state = h.state();
            // Enlisted handles stay with their unit of work.
            if !state.is_busy() && !state.is_enlisted() {
                state.set_busy(true);
                state.associate_with_current_thread();
                return Some(Arc::clone(h));
            }
        }
        None
    }

    fn return_free(&self, handle: Arc<ResourceHandle<R>>) {
        let handles = self.lock();
        if handles.iter().any(|h| h.id() == handle.id()) {
            // The association survives the return.
            handle.state().set_busy(false);
        }
    }

    fn remove(&self, handle: &ResourceHandle<R>) -> bool {
        let removed = {
            let mut handles = self.lock();
            handles
                .iter()
                .position(|h| h.id() == handle.id())
                .map(|pos| handles.swap_remove(pos))
        };

        match removed {
            Some(h) => {
                h.allocator().destroy(h.resource());
                true
            }
            None => false,
        }
    }

    fn remove_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.lock());
        for h in &drained {
            h.allocator().destroy(h.resource());
        }
        drained.len()
    }

    fn contains(&self, id: HandleId) -> bool {
        self.lock().iter().any(|h| h.id() == id)
    }

    fn size(&self) -> usize {
        self.lock().len()
    }

    fn free_size(&self) -> usize {
        self.lock().iter().filter(|h| !h.is_busy()).count()
    }
}

impl<R> fmt::Debug for AffineStorage<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffineStorage")
            .field("size", &self.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warpgrid_pool_core::ResourceAllocator;

    struct Alloc;

    impl ResourceAllocator<u64> for Alloc {
        fn create(&self) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    fn seeded(n: u64) -> Arc<AffineStorage<u64>> {
        let alloc: Arc<dyn ResourceAllocator<u64>> = Arc::new(Alloc);
        let storage = Arc::new(AffineStorage::new());
        for id in 1..=n {
            storage.add(Arc::new(ResourceHandle::new(HandleId(id), id, alloc.clone())));
        }
        storage
    }

    #[test]
    fn take_associates_with_calling_thread() {
        let storage = seeded(2);
        let h = storage.take_one_free().unwrap();
        let state = h.state();
        assert!(state.is_busy());
        assert_eq!(state.owner(), Some(thread::current().id()));
    }

    #[test]
    fn returned_handle_comes_back_to_the_same_thread() {
        let storage = seeded(3);
        let first = storage.take_one_free().unwrap();
        storage.return_free(first.clone());
        assert!(first.state().is_associated());

        let again = storage.take_one_free().unwrap();
        assert_eq!(again.id(), first.id());
    }

    #[test]
    fn associated_handle_is_not_handed_to_another_thread() {
        let storage = seeded(1);
        let h = storage.take_one_free().unwrap();
        storage.return_free(h);
        assert_eq!(storage.free_size(), 1);

        let other = Arc::clone(&storage);
        let taken = thread::spawn(move || other.take_one_free()).join().unwrap();
        assert!(taken.is_none());
    }

    #[test]
    fn disassociated_handle_is_reusable_elsewhere() {
        let storage = seeded(1);
        let h = storage.take_one_free().unwrap();
        storage.return_free(h.clone());
        h.state().disassociate();

        let other = Arc::clone(&storage);
        let taken = thread::spawn(move || other.take_one_free().map(|h| h.id()))
            .join()
            .unwrap();
        assert_eq!(taken, Some(h.id()));
    }

    #[test]
    fn take_any_free_takes_over_another_threads_handle() {
        let storage = seeded(1);
        let other = Arc::clone(&storage);
        let released = thread::spawn(move || {
            let h = other.take_one_free().unwrap();
            other.return_free(h.clone());
            h.id()
        })
        .join()
        .unwrap();

        assert!(storage.take_one_free().is_none());
        let h = storage.take_any_free().unwrap();
        assert_eq!(h.id(), released);
        assert!(h.is_busy());
        assert_eq!(h.state().owner(), Some(thread::current().id()));
    }

    #[test]
    fn take_any_free_leaves_enlisted_handles_alone() {
        let storage = seeded(1);
        let other = Arc::clone(&storage);
        let h = thread::spawn(move || {
            let h = other.take_one_free().unwrap();
            h.state().set_enlisted(true);
            other.return_free(h.clone());
            h
        })
        .join()
        .unwrap();

        assert!(storage.take_any_free().is_none());
        h.state().set_enlisted(false);
        assert!(storage.take_any_free().is_some());
    }

    #[test]
    fn free_size_counts_non_busy() {
        let storage = seeded(3);
        let _h = storage.take_one_free().unwrap();
        assert_eq!(storage.size(), 3);
        assert_eq!(storage.free_size(), 2);
    }

    #[test]
    fn remove_and_remove_all() {
        let storage = seeded(3);
        let h = storage.all_resources().pop().unwrap();
        assert!(storage.remove(&h));
        assert!(!storage.contains(h.id()));
        assert!(!storage.remove(&h));
        assert_eq!(storage.remove_all(), 2);
        assert_eq!(storage.size(), 0);
    }
}
