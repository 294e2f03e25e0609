//! One resizer sweep over a pool.

use std::sync::{Arc, Mutex, TryLockError};
use std::time::Instant;

use tracing::{debug, warn};
use warpgrid_pool_core::{
    PoolProperties, PoolStorage, PropertiesSource, ResourceHandler, StorageKind,
};

use crate::scheduler::Sweep;
use crate::{affine, bulk};

/// Resources removed by the idle/invalid phase of a sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Removal {
    pub(crate) idle_removed: usize,
    pub(crate) invalid_removed: usize,
}

impl Removal {
    fn total(&self) -> usize {
        self.idle_removed + self.invalid_removed
    }
}

/// What a sweep did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// The sweep did nothing because borrowers were waiting.
    pub skipped: bool,
    /// Idle-timed-out resources evicted.
    pub idle_removed: usize,
    /// Resources the allocator reported invalid.
    pub invalid_removed: usize,
    /// Free resources removed by the scale-down phase.
    pub scaled_down: usize,
    /// Resources created to get back to the steady size.
    pub created: usize,
    /// Live resources after the sweep.
    pub pool_size: usize,
}

impl SweepReport {
    /// Total resources removed by the sweep.
    pub fn removed(&self) -> usize {
        self.idle_removed + self.invalid_removed + self.scaled_down
    }
}

/// Removes unusable resources and keeps the pool at its steady size.
///
/// Each sweep removes every invalid resource and up to `resize_quantity`
/// idle ones (all of them when `resize_quantity` is zero); then:
/// - fewer than `resize_quantity` removed: scale down by the difference,
///   never below `steady_pool_size` (forced sweeps only);
/// - pool now below `steady_pool_size`: create resources to refill it.
///
/// At most one sweep runs at a time; a sweep that finds another in progress
/// is skipped.
pub struct Resizer<R> {
    pool_name: String,
    kind: StorageKind,
    storage: Arc<dyn PoolStorage<R>>,
    properties: Arc<dyn PropertiesSource>,
    handler: Arc<dyn ResourceHandler<R>>,
    sweeping: Mutex<()>,
}

impl<R> Resizer<R> {
    pub fn new(
        pool_name: impl Into<String>,
        kind: StorageKind,
        storage: Arc<dyn PoolStorage<R>>,
        properties: Arc<dyn PropertiesSource>,
        handler: Arc<dyn ResourceHandler<R>>,
    ) -> Self {
        Self {
            pool_name: pool_name.into(),
            kind,
            storage,
            properties,
            handler,
            sweeping: Mutex::new(()),
        }
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    /// Sweep the pool. `forced` enables the scale-down phase.
    pub fn resize(&self, forced: bool) -> SweepReport {
        self.resize_at(forced, Instant::now())
    }

    /// Sweep the pool judging idle time as of `now`.
    pub fn resize_at(&self, forced: bool, now: Instant) -> SweepReport {
        let _sweep = match self.sweeping.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!(pool = %self.pool_name, "sweep already running, skipping resize");
                return self.skipped();
            }
        };
        let props = self.properties.properties();

        if props.wait_queue_length > 0 {
            debug!(
                pool = %self.pool_name,
                waiting = props.wait_queue_length,
                "borrowers waiting, skipping resize"
            );
            return self.skipped();
        }

        let removal = self.remove_idle_and_invalid_resources(&props, now);
        let quota = props.resize_quantity.saturating_sub(removal.total());
        let scaled_down = self.scale_down_pool(&props, quota, forced);
        let created = self.ensure_steady_pool(&props);

        let report = SweepReport {
            skipped: false,
            idle_removed: removal.idle_removed,
            invalid_removed: removal.invalid_removed,
            scaled_down,
            created,
            pool_size: self.storage.size(),
        };
        debug!(pool = %self.pool_name, ?report, "resize complete");
        report
    }

    fn skipped(&self) -> SweepReport {
        SweepReport {
            skipped: true,
            pool_size: self.storage.size(),
            ..SweepReport::default()
        }
    }

    fn remove_idle_and_invalid_resources(&self, props: &PoolProperties, now: Instant) -> Removal {
        let storage = self.storage.as_ref();
        let handler = self.handler.as_ref();
        match self.kind {
            StorageKind::FreeList => {
                bulk::remove_idle_and_invalid(&self.pool_name, storage, handler, props, now)
            }
            StorageKind::ThreadAffine => {
                affine::remove_idle_and_invalid(&self.pool_name, storage, handler, props, now)
            }
        }
    }

    /// Remove up to `quantity` free resources, keeping at least
    /// `steady_pool_size` free. No-op unless `forced`.
    pub fn scale_down_pool(&self, props: &PoolProperties, quantity: usize, forced: bool) -> usize {
        if props.resize_quantity == 0 || !forced {
            return 0;
        }

        let headroom = self.storage.free_size().saturating_sub(props.steady_pool_size);
        let quantity = quantity.min(headroom);
        if quantity == 0 {
            return 0;
        }

        let removed = match self.kind {
            StorageKind::FreeList => bulk::scale_down(self.storage.as_ref(), quantity),
            StorageKind::ThreadAffine => affine::scale_down(self.storage.as_ref(), quantity),
        };
        debug!(pool = %self.pool_name, removed, "scaled down pool");
        removed
    }

    /// Create resources until the pool is back at `steady_pool_size`.
    ///
    /// The size is re-read before every creation since borrowers may grow
    /// the pool meanwhile. A creation failure is logged and ends
    /// replenishment for this sweep; the next sweep tries again.
    pub fn ensure_steady_pool(&self, props: &PoolProperties) -> usize {
        let mut created = 0;

        while self.storage.size() < props.steady_pool_size {
            match self.handler.create_and_add() {
                Ok(true) => created += 1,
                Ok(false) => break,
                Err(e) => {
                    warn!(
                        pool = %self.pool_name,
                        error = %e,
                        created,
                        "failed to replenish pool to steady size"
                    );
                    break;
                }
            }
        }
        created
    }
}

impl<R: Send + Sync + 'static> Sweep for Resizer<R> {
    fn name(&self) -> &str {
        &self.pool_name
    }

    fn sweep(&self) -> SweepReport {
        self.resize(true)
    }
}

impl<R> std::fmt::Debug for Resizer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resizer")
            .field("pool_name", &self.pool_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
