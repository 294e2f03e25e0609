//! Shared free-list storage.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use warpgrid_pool_core::{HandleId, PoolStorage, ResourceHandle};

struct Inner<R> {
    /// Every member, free or in use.
    all: HashMap<HandleId, Arc<ResourceHandle<R>>>,
    /// Free handles, most recently returned last.
    free: Vec<Arc<ResourceHandle<R>>>,
}

/// Storage with a shared free list.
///
/// Free handles are handed out LIFO so hot resources stay hot and the cold
/// tail ages into the idle timeout. Lock order is storage, then handle.
pub struct FreeListStorage<R> {
    inner: Mutex<Inner<R>>,
}

impl<R> FreeListStorage<R> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                all: HashMap::new(),
                free: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R> Default for FreeListStorage<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + Sync> PoolStorage<R> for FreeListStorage<R> {
    fn add(&self, handle: Arc<ResourceHandle<R>>) {
        let mut inner = self.lock();
        let free = !handle.is_busy();
        if inner.all.insert(handle.id(), Arc::clone(&handle)).is_none() && free {
            inner.free.push(handle);
        }
    }

    fn all_resources(&self) -> Vec<Arc<ResourceHandle<R>>> {
        self.lock().all.values().cloned().collect()
    }

    fn take_one_free(&self) -> Option<Arc<ResourceHandle<R>>> {
        let mut inner = self.lock();
        while let Some(handle) = inner.free.pop() {
            // A busy handle on the free list has been claimed for removal.
            if handle.try_claim() {
                return Some(handle);
            }
        }
        None
    }

    fn return_free(&self, handle: Arc<ResourceHandle<R>>) {
        let mut inner = self.lock();
        if !inner.all.contains_key(&handle.id()) {
            debug!(handle = %handle.id(), "ignoring return of removed handle");
            return;
        }
        if inner.free.iter().any(|h| h.id() == handle.id()) {
            debug!(handle = %handle.id(), "handle already on the free list");
            return;
        }
        handle.state().set_busy(false);
        inner.free.push(handle);
    }

    fn remove(&self, handle: &ResourceHandle<R>) -> bool {
        let removed = {
            let mut inner = self.lock();
            let removed = inner.all.remove(&handle.id());
            if removed.is_some() {
                inner.free.retain(|h| h.id() != handle.id());
            }
            removed
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
        let drained: Vec<_> = {
            let mut inner = self.lock();
            inner.free.clear();
            inner.all.drain().map(|(_, h)| h).collect()
        };
        for h in &drained {
            h.allocator().destroy(h.resource());
        }
        drained.len()
    }

    fn contains(&self, id: HandleId) -> bool {
        self.lock().all.contains_key(&id)
    }

    fn size(&self) -> usize {
        self.lock().all.len()
    }

    fn free_size(&self) -> usize {
        self.lock().free.len()
    }
}

impl<R> fmt::Debug for FreeListStorage<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("FreeListStorage")
            .field("size", &inner.all.len())
            .field("free", &inner.free.len())
            .finish()
    }
}
