//! Resource handles and their mutable state.
//!
//! A `ResourceHandle` is the pool's unit of identity: it wraps one raw
//! resource together with a `ResourceState` guarded by a per-handle lock.
//! Storage owns the handle's membership (free vs. in-use); a borrower owns
//! the right to use the resource while it is checked out, never the handle
//! lifecycle.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use crate::allocator::ResourceAllocator;

/// Identity of a pooled handle, unique within a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Mutable status of a pooled resource.
///
/// Only ever touched through [`ResourceHandle::state`], which holds the
/// handle's lock for the lifetime of the guard.
#[derive(Clone, Debug)]
pub struct ResourceState {
    /// When the resource was last released to (or created in) the pool.
    last_usage: Instant,
    /// When the resource was last confirmed valid by its allocator.
    last_validated: Option<Instant>,
    /// Checked out by a borrower (or reserved by a sweep for removal).
    busy: bool,
    /// Participating in a unit of work.
    enlisted: bool,
    /// Bound to a specific borrower thread (thread-affine storage only).
    associated: bool,
    /// The thread the handle is associated with, if any.
    owner: Option<ThreadId>,
    /// Borrows handed out so far.
    usage_count: u64,
    /// The borrow currently holding the handle, by usage count.
    lease: Option<u64>,
}

impl ResourceState {
    fn new(now: Instant) -> Self {
        Self {
            last_usage: now,
            last_validated: None,
            busy: false,
            enlisted: false,
            associated: false,
            owner: None,
            usage_count: 0,
            lease: None,
        }
    }

    pub fn last_usage(&self) -> Instant {
        self.last_usage
    }

    pub fn last_validated(&self) -> Option<Instant> {
        self.last_validated
    }

    /// Record a usage at `now`. `last_usage` never moves backwards.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_usage {
            self.last_usage = now;
        }
    }

    /// Record a successful validation at `now`.
    pub fn mark_validated(&mut self, now: Instant) {
        self.last_validated = Some(now);
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    /// Hand the handle to a new borrower. Marks it busy and returns the
    /// borrow's lease number, which `end_lease` must present.
    pub fn begin_lease(&mut self) -> u64 {
        self.busy = true;
        self.usage_count += 1;
        self.lease = Some(self.usage_count);
        self.usage_count
    }

    /// End the borrow holding `lease`. Returns `false` for any other lease,
    /// including one already ended. Leaves `busy` to storage.
    pub fn end_lease(&mut self, lease: u64) -> bool {
        if self.lease != Some(lease) {
            return false;
        }
        self.lease = None;
        true
    }

    pub fn is_enlisted(&self) -> bool {
        self.enlisted
    }

    pub fn set_enlisted(&mut self, enlisted: bool) {
        self.enlisted = enlisted;
    }

    pub fn is_associated(&self) -> bool {
        self.associated
    }

    /// The thread this handle is associated with, if still associated.
    pub fn owner(&self) -> Option<ThreadId> {
        if self.associated { self.owner } else { None }
    }

    /// Bind the handle to the calling thread.
    pub fn associate_with_current_thread(&mut self) {
        self.associated = true;
        self.owner = Some(thread::current().id());
    }

    /// Release any thread binding so another thread may reuse the handle.
    pub fn disassociate(&mut self) {
        self.associated = false;
        self.owner = None;
    }
}

/// Identity-unique wrapper around one pooled resource.
pub struct ResourceHandle<R> {
    id: HandleId,
    resource: R,
    allocator: Arc<dyn ResourceAllocator<R>>,
    state: Mutex<ResourceState>,
}

impl<R> ResourceHandle<R> {
    /// Wrap a freshly created resource. The handle starts free, with
    /// `last_usage` set to now.
    pub fn new(id: HandleId, resource: R, allocator: Arc<dyn ResourceAllocator<R>>) -> Self {
        Self {
            id,
            resource,
            allocator,
            state: Mutex::new(ResourceState::new(Instant::now())),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// The allocator that created this resource.
    pub fn allocator(&self) -> &Arc<dyn ResourceAllocator<R>> {
        &self.allocator
    }

    /// Lock the handle's state.
    ///
    /// A panic while the lock was held leaves the state as the panicking
    /// code wrote it; the lock is recovered rather than propagated.
    pub fn state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically claim the handle if nobody holds it. Returns `false` if it
    /// was already busy.
    pub fn try_claim(&self) -> bool {
        let mut state = self.state();
        if state.busy {
            return false;
        }
        state.busy = true;
        true
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }
}

impl<R> fmt::Debug for ResourceHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ResourceHandle");
        s.field("id", &self.id);
        // try_lock: formatting must not deadlock when the caller holds the state.
        match self.state.try_lock() {
            Ok(state) => s.field("state", &*state),
            Err(_) => s.field("state", &format_args!("<locked>")),
        };
        s.finish_non_exhaustive()
    }
}

impl<R> fmt::Display for ResourceHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}
