//! The resource pool facade.
//!
//! Ties storage, the resizer, and its scheduler together behind
//! borrow/return and lifecycle operations. All lifecycle operations
//! (`init`, `flush`, `reconfigure`, `shutdown`) are serialized by the
//! scheduler slot lock; borrow/return never take it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info, warn};
use warpgrid_pool_core::{
    HandleId, PoolConfig, PoolError, PoolProperties, PoolResult, PoolStorage, PropertiesSource,
    ResourceAllocator, ResourceHandle, ResourceHandler, StorageKind,
};
use warpgrid_reconfig::{DEFUNCT, DelegateLookup, ReconfigContext, VersionRegistry};
use warpgrid_resizer::{Resizer, SweepReport, SweepScheduler};

use crate::lease::PooledResource;
use crate::status::PoolStatus;

/// State shared between the pool, its resizer, and reconfiguration proxies.
struct PoolInner<R> {
    name: String,
    kind: StorageKind,
    config: RwLock<PoolConfig>,
    allocator: Arc<dyn ResourceAllocator<R>>,
    storage: Arc<dyn PoolStorage<R>>,
    next_id: AtomicU64,
    /// Borrowers blocked in `acquire`.
    waiters: AtomicUsize,
    available: Notify,
    version: AtomicI64,
    initialized: AtomicBool,
    shut_down: AtomicBool,
    /// Serializes the capacity check with the add on every creation path.
    create_gate: Mutex<()>,
}

impl<R: Send + Sync> PoolInner<R> {
    fn config(&self) -> PoolConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn ensure_open(&self) -> PoolResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown(self.name.clone()));
        }
        Ok(())
    }

    fn create_handle(&self) -> PoolResult<Arc<ResourceHandle<R>>> {
        let resource = self.allocator.create()?;
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Ok(Arc::new(ResourceHandle::new(id, resource, Arc::clone(&self.allocator))))
    }

    /// Create a resource already checked out to the caller, if the pool has
    /// room for it.
    fn create_borrowed(&self, max_pool_size: usize) -> PoolResult<Option<PooledResource<R>>> {
        let _gate = self.create_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.storage.size() >= max_pool_size {
            return Ok(None);
        }

        let handle = self.create_handle()?;
        let lease = {
            let mut state = handle.state();
            if self.kind == StorageKind::ThreadAffine {
                state.associate_with_current_thread();
            }
            state.begin_lease()
        };
        self.storage.add(Arc::clone(&handle));
        debug!(pool = %self.name, handle = %handle.id(), "created resource for borrower");
        Ok(Some(PooledResource::new(handle, lease)))
    }

    /// Lend a handle taken from storage.
    fn lend(&self, handle: Arc<ResourceHandle<R>>) -> PooledResource<R> {
        let lease = {
            let mut state = handle.state();
            state.touch(Instant::now());
            state.begin_lease()
        };
        debug!(pool = %self.name, handle = %handle.id(), lease, "reused free resource");
        PooledResource::new(handle, lease)
    }

    /// Borrow-time check. A resource validated within
    /// `validate_at_most_once` passes without asking the allocator.
    fn passes_borrow_validation(&self, handle: &ResourceHandle<R>, config: &PoolConfig) -> bool {
        if !config.validate_on_borrow {
            return true;
        }

        let now = Instant::now();
        let recently_validated = handle.state().last_validated().is_some_and(|at| {
            now.saturating_duration_since(at) < config.validate_at_most_once
        });
        if recently_validated {
            return true;
        }

        if self.allocator.is_valid(handle.resource()) {
            handle.state().mark_validated(now);
            true
        } else {
            false
        }
    }

    /// Create resources until the pool holds `steady_pool_size`.
    fn fill_to_steady(&self, steady_pool_size: usize) -> PoolResult<usize> {
        let mut created = 0;
        while self.storage.size() < steady_pool_size {
            if !self.create_and_add()? {
                break;
            }
            created += 1;
        }
        Ok(created)
    }

    /// Remove up to `limit` free resources.
    fn remove_free(&self, limit: usize) -> usize {
        let mut removed = 0;
        for handle in self.storage.all_resources() {
            if removed >= limit {
                break;
            }
            if handle.try_claim() && self.storage.remove(&handle) {
                removed += 1;
            }
        }
        removed
    }
}

impl<R: Send + Sync> ResourceHandler<R> for PoolInner<R> {
    fn create_and_add(&self) -> PoolResult<bool> {
        {
            let _gate = self.create_gate.lock().unwrap_or_else(PoisonError::into_inner);
            if self.storage.size() >= self.config().max_pool_size {
                return Ok(false);
            }
            let handle = self.create_handle()?;
            self.storage.add(handle);
        }
        self.available.notify_one();
        Ok(true)
    }

    fn find_invalid(&self, candidates: &[Arc<ResourceHandle<R>>]) -> PoolResult<HashSet<HandleId>> {
        Ok(self.allocator.find_invalid(candidates)?)
    }

    fn invalid_connection_detected(&self, handle: &ResourceHandle<R>) {
        warn!(pool = %self.name, handle = %handle.id(), "invalid resource removed from pool");
    }
}

impl<R: Send + Sync> PropertiesSource for PoolInner<R> {
    fn properties(&self) -> PoolProperties {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .properties(self.waiters.load(Ordering::Acquire))
    }
}

impl<R: Send + Sync> VersionRegistry for PoolInner<R> {
    fn current_version(&self, identity: &str) -> i64 {
        if identity != self.name || self.shut_down.load(Ordering::Acquire) {
            return DEFUNCT;
        }
        self.version.load(Ordering::Acquire)
    }
}

/// Counts a borrower in the wait queue for as long as it lives.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A pool of resources created by one allocator.
pub struct ResourcePool<R> {
    inner: Arc<PoolInner<R>>,
    resizer: Arc<Resizer<R>>,
    scheduler: Mutex<Option<SweepScheduler>>,
}

impl<R: Send + Sync + 'static> ResourcePool<R> {
    /// Build an empty pool. Nothing is created until [`ResourcePool::init`].
    pub fn new(
        name: impl Into<String>,
        config: PoolConfig,
        allocator: Arc<dyn ResourceAllocator<R>>,
    ) -> PoolResult<Self> {
        config.validate()?;
        let name = name.into();
        let kind = config.storage;
        let storage = warpgrid_pool_storage::storage_for::<R>(&config);

        let inner = Arc::new(PoolInner {
            name: name.clone(),
            kind,
            config: RwLock::new(config),
            allocator,
            storage: Arc::clone(&storage),
            next_id: AtomicU64::new(1),
            waiters: AtomicUsize::new(0),
            available: Notify::new(),
            version: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            create_gate: Mutex::new(()),
        });

        let properties: Arc<dyn PropertiesSource> = inner.clone();
        let handler: Arc<dyn ResourceHandler<R>> = inner.clone();
        let resizer = Arc::new(Resizer::new(name, kind, storage, properties, handler));

        Ok(Self {
            inner,
            resizer,
            scheduler: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> PoolConfig {
        self.inner.config()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Current reconfiguration version.
    pub fn version(&self) -> i64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Whether a resizer is scheduled.
    pub fn is_resizer_scheduled(&self) -> bool {
        self.lifecycle().as_ref().is_some_and(|s| !s.is_finished())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Option<SweepScheduler>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Prefill to the steady size and schedule the resizer.
    ///
    /// The resizer runs every `idle_timeout` and needs a tokio runtime; an
    /// idle timeout of zero disables it. Calling `init` twice is a no-op.
    pub fn init(&self) -> PoolResult<()> {
        let mut slot = self.lifecycle();
        self.inner.ensure_open()?;
        if self.is_initialized() {
            return Ok(());
        }

        let config = self.inner.config();
        let created = self.inner.fill_to_steady(config.steady_pool_size)?;
        self.schedule_resizer(&mut slot, config.idle_timeout)?;
        self.inner.initialized.store(true, Ordering::Release);

        info!(
            pool = %self.inner.name,
            created,
            steady = config.steady_pool_size,
            max = config.max_pool_size,
            storage = ?self.inner.kind,
            "pool initialized"
        );
        Ok(())
    }

    fn schedule_resizer(&self, slot: &mut Option<SweepScheduler>, idle_timeout: Duration) -> PoolResult<()> {
        if let Some(old) = slot.take() {
            old.cancel();
        }
        if idle_timeout.is_zero() {
            debug!(pool = %self.inner.name, "idle timeout is zero, resizer disabled");
            return Ok(());
        }
        *slot = Some(SweepScheduler::start(self.resizer.clone(), idle_timeout)?);
        Ok(())
    }

    /// Borrow a resource without waiting.
    ///
    /// Takes a free resource if there is one, otherwise creates one while
    /// the pool is below `max_pool_size`. At the maximum, a thread-affine
    /// pool takes over a free resource associated with another thread.
    /// Returns `None` when the pool is exhausted. Initializes the pool on
    /// first use.
    pub fn try_acquire(&self) -> PoolResult<Option<PooledResource<R>>> {
        self.inner.ensure_open()?;
        if !self.is_initialized() {
            self.init()?;
        }
        let config = self.inner.config();

        if let Some(lease) = self.take_valid(&config, |storage| storage.take_one_free())? {
            return Ok(Some(lease));
        }
        if let Some(lease) = self.inner.create_borrowed(config.max_pool_size)? {
            return Ok(Some(lease));
        }
        self.take_valid(&config, |storage| storage.take_any_free())
    }

    /// Take free resources with `take` until one passes the borrow-time
    /// check. Resources that fail are destroyed, or with
    /// `fail_all_on_error` the whole pool is recreated.
    fn take_valid(
        &self,
        config: &PoolConfig,
        take: impl Fn(&dyn PoolStorage<R>) -> Option<Arc<ResourceHandle<R>>>,
    ) -> PoolResult<Option<PooledResource<R>>> {
        while let Some(handle) = take(self.inner.storage.as_ref()) {
            if self.inner.passes_borrow_validation(&handle, config) {
                return Ok(Some(self.inner.lend(handle)));
            }

            warn!(
                pool = %self.inner.name,
                handle = %handle.id(),
                "resource failed validation on borrow"
            );
            if config.fail_all_on_error {
                self.fail_all_resources();
                // Everything left in the pool was just created.
                return match self.inner.storage.take_one_free() {
                    Some(fresh) => Ok(Some(self.inner.lend(fresh))),
                    None => self.inner.create_borrowed(config.max_pool_size),
                };
            }
            self.inner.storage.remove(&handle);
        }
        Ok(None)
    }

    /// Borrow a resource, waiting up to `max_wait` when the pool is exhausted.
    pub async fn acquire(&self) -> PoolResult<PooledResource<R>> {
        let max_wait = self.inner.config().max_wait;
        self.acquire_timeout(max_wait).await
    }

    /// Borrow a resource, waiting up to `timeout` when the pool is exhausted.
    ///
    /// Waiting borrowers count toward the wait queue, which suppresses
    /// resizer sweeps.
    pub async fn acquire_timeout(&self, timeout: Duration) -> PoolResult<PooledResource<R>> {
        let started = tokio::time::Instant::now();
        let deadline = started + timeout;

        loop {
            if let Some(handle) = self.try_acquire()? {
                return Ok(handle);
            }

            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // A release may have landed between the attempt and `enable`.
            if let Some(handle) = self.try_acquire()? {
                return Ok(handle);
            }

            let _waiting = Waiting::enter(&self.inner.waiters);
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!(pool = %self.inner.name, ?timeout, "timed out waiting for a resource");
                return Err(PoolError::Exhausted {
                    pool: self.inner.name.clone(),
                    waited: started.elapsed(),
                });
            }
        }
    }

    /// Return a borrowed resource to the pool.
    ///
    /// Fails with [`PoolError::NotBorrowed`] unless `resource` is the
    /// handle's current borrow. A resource that has reached `max_usage`
    /// borrows is destroyed instead, and the pool topped up to its steady
    /// size.
    pub fn release(&self, resource: PooledResource<R>) -> PoolResult<()> {
        let (handle, lease) = resource.into_parts();
        let usage = {
            let mut state = handle.state();
            if !state.is_busy() || !state.end_lease(lease) {
                return Err(PoolError::NotBorrowed(handle.id()));
            }
            state.touch(Instant::now());
            state.usage_count()
        };

        if !self.inner.storage.contains(handle.id()) {
            debug!(pool = %self.inner.name, handle = %handle.id(), "released resource no longer in pool");
            return Ok(());
        }

        let config = self.inner.config();
        if config.max_usage > 0 && usage >= config.max_usage {
            self.inner.storage.remove(&handle);
            info!(
                pool = %self.inner.name,
                handle = %handle.id(),
                usage,
                "resource reached its maximum usage, destroyed"
            );
            if self.inner.storage.size() < config.steady_pool_size {
                if let Err(e) = self.inner.create_and_add() {
                    warn!(pool = %self.inner.name, error = %e, "failed to replace retired resource");
                }
            }
            self.inner.available.notify_one();
            return Ok(());
        }

        self.inner.storage.return_free(handle);
        self.inner.available.notify_one();
        Ok(())
    }

    /// Drop a broken resource from the pool. With `fail_all_on_error` every
    /// resource is destroyed and the pool refilled instead.
    pub fn resource_error_occurred(&self, resource: PooledResource<R>) {
        let (handle, _lease) = resource.into_parts();
        if self.inner.config().fail_all_on_error {
            self.fail_all_resources();
            return;
        }
        if self.inner.storage.remove(&handle) {
            warn!(pool = %self.inner.name, handle = %handle.id(), "resource error, removed from pool");
            // Room for a waiter to create a replacement.
            self.inner.available.notify_one();
        }
    }

    /// Destroy every resource and refill to the steady size. Creation
    /// failures are left to the resizer.
    fn fail_all_resources(&self) {
        warn!(pool = %self.inner.name, "failing all resources");
        if let Err(e) = self.flush() {
            warn!(
                pool = %self.inner.name,
                error = %e,
                "could not refill pool after failing all resources"
            );
        }
    }

    /// Run one sweep now. `forced` enables scale-down.
    pub fn resize(&self, forced: bool) -> SweepReport {
        self.resizer.resize(forced)
    }

    /// Remove every free resource. Borrowed resources are left alone.
    pub fn empty_free(&self) -> usize {
        let removed = self.inner.remove_free(usize::MAX);
        debug!(pool = %self.inner.name, removed, "emptied free resources");
        removed
    }

    /// Destroy every resource and refill to the steady size.
    pub fn flush(&self) -> PoolResult<()> {
        let mut slot = self.lifecycle();
        self.inner.ensure_open()?;
        if !self.is_initialized() {
            return Err(PoolError::NotInitialized(self.inner.name.clone()));
        }

        if let Some(scheduler) = slot.take() {
            scheduler.cancel();
        }
        let removed = self.inner.storage.remove_all();
        let config = self.inner.config();
        self.schedule_resizer(&mut slot, config.idle_timeout)?;
        let created = self.inner.fill_to_steady(config.steady_pool_size)?;

        info!(pool = %self.inner.name, removed, created, "pool flushed");
        Ok(())
    }

    /// Apply new settings to a live pool.
    ///
    /// `max_pool_size` is raised to the current steady size if needed and
    /// `steady_pool_size` is lowered to the new max. On an initialized pool,
    /// free resources above the new max are destroyed, a larger steady size
    /// is filled immediately, and the resizer is rescheduled when the idle
    /// timeout changes. Bumps the reconfiguration version.
    pub fn reconfigure(&self, config: PoolConfig) -> PoolResult<()> {
        let mut slot = self.lifecycle();
        self.inner.ensure_open()?;

        let (old, applied) = {
            let mut current = self.inner.config.write().unwrap_or_else(PoisonError::into_inner);
            if config.storage != current.storage {
                return Err(PoolError::Config(format!(
                    "pool {}: storage cannot change from {:?} to {:?}",
                    self.inner.name, current.storage, config.storage
                )));
            }

            let old = current.clone();
            let mut applied = config;
            applied.max_pool_size = applied.max_pool_size.max(old.steady_pool_size).max(1);
            applied.steady_pool_size = applied.steady_pool_size.min(applied.max_pool_size);
            *current = applied.clone();
            (old, applied)
        };

        if self.is_initialized() {
            if applied.idle_timeout != old.idle_timeout {
                self.schedule_resizer(&mut slot, applied.idle_timeout)?;
            }

            let excess = self.inner.storage.size().saturating_sub(applied.max_pool_size);
            if excess > 0 {
                let killed = self.inner.remove_free(excess);
                debug!(pool = %self.inner.name, killed, "removed resources above new max");
            }

            if applied.steady_pool_size > old.steady_pool_size {
                self.inner.fill_to_steady(applied.steady_pool_size)?;
            }
        }

        let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            pool = %self.inner.name,
            version,
            steady = applied.steady_pool_size,
            max = applied.max_pool_size,
            idle_timeout_ms = applied.idle_timeout.as_millis() as u64,
            "pool reconfigured"
        );
        Ok(())
    }

    pub fn status(&self) -> PoolStatus {
        let total = self.inner.storage.size();
        let free = self.inner.storage.free_size();
        PoolStatus {
            name: self.inner.name.clone(),
            total,
            free,
            busy: total.saturating_sub(free),
            waiting: self.inner.waiters.load(Ordering::Acquire),
        }
    }

    /// Collaborators for proxies that follow this pool's reconfigurations.
    /// The pool name is the resource identity.
    pub fn reconfig_context<D>(&self, lookup: Arc<dyn DelegateLookup<D>>) -> ReconfigContext<D> {
        let registry: Arc<dyn VersionRegistry> = self.inner.clone();
        ReconfigContext::new(registry, lookup)
    }

    /// Stop the resizer and destroy every resource. Waiting borrowers fail
    /// with [`PoolError::ShutDown`]; proxies become invalid.
    pub fn shutdown(&self) {
        let mut slot = self.lifecycle();
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(scheduler) = slot.take() {
            scheduler.cancel();
        }
        let removed = self.inner.storage.remove_all();
        self.inner.available.notify_waiters();
        info!(pool = %self.inner.name, removed, "pool shut down");
    }
}

impl<R> Drop for ResourcePool<R> {
    fn drop(&mut self) {
        let slot = self.scheduler.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(scheduler) = slot.take() {
            scheduler.cancel();
        }
    }
}

impl<R> std::fmt::Debug for ResourcePool<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("size", &self.inner.storage.size())
            .finish_non_exhaustive()
    }
}
