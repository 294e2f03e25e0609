//! Sweep for free-list storage: drain the free list, keep what survives.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use warpgrid_pool_core::{PoolProperties, PoolStorage, ResourceHandle, ResourceHandler};

use crate::eligibility::{Eligibility, EligibilityPolicy};
use crate::resizer::Removal;

/// Handles taken out of the free list during a sweep.
///
/// Everything still held when the guard drops goes back to the free list,
/// so an early return or a panic mid-sweep never loses a handle.
pub(crate) struct ReturnGuard<'a, R> {
    storage: &'a dyn PoolStorage<R>,
    held: Vec<Arc<ResourceHandle<R>>>,
}

impl<'a, R> ReturnGuard<'a, R> {
    pub(crate) fn new(storage: &'a dyn PoolStorage<R>) -> Self {
        Self {
            storage,
            held: Vec::new(),
        }
    }

    pub(crate) fn keep(&mut self, handle: Arc<ResourceHandle<R>>) {
        self.held.push(handle);
    }

    pub(crate) fn len(&self) -> usize {
        self.held.len()
    }
}

impl<R> Drop for ReturnGuard<'_, R> {
    fn drop(&mut self) {
        for handle in self.held.drain(..) {
            self.storage.return_free(handle);
        }
    }
}

pub(crate) fn remove_idle_and_invalid<R>(
    pool: &str,
    storage: &dyn PoolStorage<R>,
    handler: &dyn ResourceHandler<R>,
    props: &PoolProperties,
    now: Instant,
) -> Removal {
    let policy = EligibilityPolicy::new(props);
    let idle_cap = idle_eviction_cap(props);
    let free_before = storage.free_size();

    let mut valid_count = 0;
    let mut kept_in_steady = 0;
    let mut idle_removed = 0;
    let mut to_validate = Vec::new();

    {
        let mut active = ReturnGuard::new(storage);
        while let Some(handle) = storage.take_one_free() {
            let outcome = {
                let mut state = handle.state();
                policy.classify(&handle, &mut state, now, valid_count)
            };

            match outcome {
                Eligibility::KeepIdle => {
                    valid_count += 1;
                    to_validate.push(Arc::clone(&handle));
                    active.keep(handle);
                }
                Eligibility::KeepSteady => {
                    valid_count += 1;
                    kept_in_steady += 1;
                    debug!(
                        pool,
                        handle = %handle.id(),
                        valid_count,
                        steady = props.steady_pool_size,
                        "keeping validated idle resource in the steady part"
                    );
                    active.keep(handle);
                }
                Eligibility::Evict if idle_removed < idle_cap => {
                    if storage.remove(&handle) {
                        idle_removed += 1;
                    }
                }
                // Over this sweep's eviction cap; reconsidered next sweep.
                Eligibility::Evict => active.keep(handle),
            }
        }
        debug!(pool, returning = active.len(), "returning active resources to the free list");
    }

    let invalid_removed = remove_invalid_resources(pool, storage, handler, &to_validate);

    debug!(
        pool,
        free_before,
        idle_removed,
        kept_in_steady,
        invalid_removed,
        "idle and invalid resources removed"
    );

    Removal {
        idle_removed,
        invalid_removed,
    }
}

/// Batch-validate candidates, then remove those reported invalid that are
/// still free. Candidates borrowed in the meantime are left alone.
fn remove_invalid_resources<R>(
    pool: &str,
    storage: &dyn PoolStorage<R>,
    handler: &dyn ResourceHandler<R>,
    candidates: &[Arc<ResourceHandle<R>>],
) -> usize {
    if candidates.is_empty() {
        return 0;
    }

    debug!(pool, candidates = candidates.len(), "sending free resources for validation");
    let invalid = match handler.find_invalid(candidates) {
        Ok(invalid) => invalid,
        Err(e) => {
            debug!(pool, error = %e, "could not obtain invalid resources from allocator");
            return 0;
        }
    };
    if invalid.is_empty() {
        return 0;
    }

    let mut removed = 0;
    let mut valid = ReturnGuard::new(storage);
    while let Some(handle) = storage.take_one_free() {
        if invalid.contains(&handle.id()) {
            if storage.remove(&handle) {
                handler.invalid_connection_detected(&handle);
                removed += 1;
            }
        } else {
            valid.keep(handle);
        }
    }

    debug!(pool, reported = invalid.len(), removed, "invalid resources reported by allocator");
    removed
}

pub(crate) fn scale_down<R>(storage: &dyn PoolStorage<R>, quantity: usize) -> usize {
    let mut removed = 0;
    while removed < quantity {
        let Some(handle) = storage.take_one_free() else {
            break;
        };
        if storage.remove(&handle) {
            removed += 1;
        }
    }
    removed
}

/// Idle evictions per sweep are capped at `resize_quantity`; zero means no cap.
pub(crate) fn idle_eviction_cap(props: &PoolProperties) -> usize {
    if props.resize_quantity > 0 {
        props.resize_quantity
    } else {
        usize::MAX
    }
}
