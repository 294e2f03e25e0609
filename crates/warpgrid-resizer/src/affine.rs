//! Sweep for thread-affine storage.
//!
//! Handles may be referenced by the thread they are associated with, so
//! nothing is ever dequeued blindly. The sweep walks a snapshot of all
//! handles, takes each handle's lock before looking at it, skips busy ones,
//! and claims victims (marks them busy) under that lock. Victims are removed
//! from storage only after the scan; `remove` re-checks membership.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use warpgrid_pool_core::{PoolProperties, PoolStorage, ResourceHandle, ResourceHandler};

use crate::bulk::idle_eviction_cap;
use crate::eligibility::{Eligibility, EligibilityPolicy};
use crate::resizer::Removal;

enum Action {
    Skip,
    Validate,
    Evict,
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

    let mut valid_count = 0;
    let mut disassociated = 0;
    let mut to_validate = Vec::new();
    let mut to_remove: Vec<Arc<ResourceHandle<R>>> = Vec::new();

    for handle in storage.all_resources() {
        let action = {
            let mut state = handle.state();
            if state.is_busy() {
                Action::Skip
            } else {
                match policy.classify(&handle, &mut state, now, valid_count) {
                    Eligibility::KeepIdle => {
                        valid_count += 1;
                        if state.is_associated() && !state.is_enlisted() {
                            state.disassociate();
                            disassociated += 1;
                        }
                        Action::Validate
                    }
                    Eligibility::KeepSteady => {
                        valid_count += 1;
                        Action::Skip
                    }
                    Eligibility::Evict if to_remove.len() < idle_cap => {
                        // Unusable from here on; no borrower can claim it.
                        state.set_busy(true);
                        Action::Evict
                    }
                    Eligibility::Evict => Action::Skip,
                }
            }
        };

        match action {
            Action::Skip => {}
            Action::Validate => to_validate.push(handle),
            Action::Evict => to_remove.push(handle),
        }
    }

    let idle_removed = to_remove.iter().filter(|h| storage.remove(h)).count();
    let invalid_removed = remove_invalid_resources(pool, storage, handler, &to_validate);

    debug!(
        pool,
        idle_removed,
        invalid_removed,
        disassociated,
        "idle and invalid thread-affine resources removed"
    );

    Removal {
        idle_removed,
        invalid_removed,
    }
}

fn remove_invalid_resources<R>(
    pool: &str,
    storage: &dyn PoolStorage<R>,
    handler: &dyn ResourceHandler<R>,
    candidates: &[Arc<ResourceHandle<R>>],
) -> usize {
    if candidates.is_empty() {
        return 0;
    }

    let invalid = match handler.find_invalid(candidates) {
        Ok(invalid) => invalid,
        Err(e) => {
            debug!(pool, error = %e, "could not obtain invalid resources from allocator");
            return 0;
        }
    };

    let mut removed = 0;
    for handle in candidates.iter().filter(|h| invalid.contains(&h.id())) {
        // Borrowed since it was validated; leave it for the next sweep.
        if !handle.try_claim() {
            continue;
        }
        if storage.remove(handle) {
            handler.invalid_connection_detected(handle);
            removed += 1;
        }
    }
    removed
}

pub(crate) fn scale_down<R>(storage: &dyn PoolStorage<R>, quantity: usize) -> usize {
    let mut victims = Vec::new();
    for handle in storage.all_resources() {
        if victims.len() >= quantity {
            break;
        }
        if handle.try_claim() {
            victims.push(handle);
        }
    }
    victims.iter().filter(|h| storage.remove(h)).count()
}
