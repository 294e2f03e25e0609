//! The reconfiguration proxy.
//!
//! ```text
//! invoke(op)
//!   invalid                         → ResourceInvalid
//!   SetDelegate / SetInvalid        → mutate local state, no version check
//!   Call:
//!     registry version == DEFUNCT   → mark invalid, fail as above
//!     registry version > cached     → lookup(skip_proxy), swap delegate, cache version
//!     delegate.execute(request)     → unwrap ≤ 2 Wrapped layers
//!     Reconfigured                  → run the call once more
//! ```

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::{debug, info};

use crate::error::{ReconfigError, ReconfigResult};
use crate::registry::{DEFUNCT, LookupOptions, ReconfigContext};

/// Wrapped layers peeled off a delegate failure before it is inspected.
const UNWRAP_LEVELS: usize = 2;

/// The resource a proxy stands in front of.
pub trait Delegate: Send + Sync {
    type Request;
    type Response;

    fn execute(&self, request: &Self::Request) -> ReconfigResult<Self::Response>;
}

/// Everything a proxy can be asked to do.
pub enum Operation<D: Delegate> {
    /// Forward a request to the delegate.
    Call(D::Request),
    /// Replace the delegate in place.
    SetDelegate(Arc<D>),
    /// Permanently invalidate the proxy.
    SetInvalid,
}

/// A stable handle whose delegate is refreshed when its pool is reconfigured.
pub struct ReconfigProxy<D> {
    identity: String,
    ctx: ReconfigContext<D>,
    delegate: ArcSwap<D>,
    version: AtomicI64,
    invalid: AtomicBool,
    /// Serializes delegate refreshes so a new version is looked up once.
    refresh: Mutex<()>,
}

impl<D: Delegate> ReconfigProxy<D> {
    /// Proxy `delegate`, which is current as of `version`.
    pub fn new(
        identity: impl Into<String>,
        delegate: Arc<D>,
        version: i64,
        ctx: ReconfigContext<D>,
    ) -> Self {
        Self {
            identity: identity.into(),
            ctx,
            delegate: ArcSwap::new(delegate),
            version: AtomicI64::new(version),
            invalid: AtomicBool::new(false),
            refresh: Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Version the current delegate was looked up at.
    pub fn version(&self) -> i64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn is_valid(&self) -> bool {
        !self.invalid.load(Ordering::Acquire)
    }

    pub fn delegate(&self) -> Arc<D> {
        self.delegate.load_full()
    }

    /// Single entry point for every operation. Control operations yield
    /// `None`.
    pub fn invoke(&self, op: &Operation<D>) -> ReconfigResult<Option<D::Response>> {
        match op {
            Operation::SetDelegate(delegate) => {
                self.set_delegate(Arc::clone(delegate));
                Ok(None)
            }
            Operation::SetInvalid => {
                self.set_invalid();
                Ok(None)
            }
            Operation::Call(request) => self.call(request).map(Some),
        }
    }

    /// Forward `request`, retrying once if the pool was reconfigured under it.
    pub fn call(&self, request: &D::Request) -> ReconfigResult<D::Response> {
        match self.call_once(request) {
            Err(e) if e.is_reconfigured() => {
                debug!(identity = %self.identity, "pool reconfigured during call, retrying once");
                self.call_once(request)
            }
            result => result,
        }
    }

    pub fn set_delegate(&self, delegate: Arc<D>) {
        self.delegate.store(delegate);
    }

    pub fn set_invalid(&self) {
        if !self.invalid.swap(true, Ordering::AcqRel) {
            info!(identity = %self.identity, "resource proxy invalidated");
        }
    }

    fn call_once(&self, request: &D::Request) -> ReconfigResult<D::Response> {
        self.ensure_valid()?;
        self.synchronize()?;

        self.delegate
            .load()
            .execute(request)
            .map_err(|e| e.unwrap_levels(UNWRAP_LEVELS))
    }

    fn ensure_valid(&self) -> ReconfigResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ReconfigError::ResourceInvalid(self.identity.clone()))
        }
    }

    /// Bring the delegate up to the registry's version.
    fn synchronize(&self) -> ReconfigResult<()> {
        let current = self.ctx.registry.current_version(&self.identity);

        if current == DEFUNCT {
            self.set_invalid();
            return self.ensure_valid();
        }
        if current <= self.version() {
            return Ok(());
        }

        let _gate = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        let cached = self.version();
        if current <= cached {
            // Refreshed by another caller while we waited.
            return Ok(());
        }

        let fresh = self
            .ctx
            .lookup
            .lookup(&self.identity, &LookupOptions { skip_proxy: true })?;
        self.delegate.store(fresh);
        self.version.store(current, Ordering::Release);

        info!(
            identity = %self.identity,
            from = cached,
            to = current,
            "resource delegate refreshed after reconfiguration"
        );
        Ok(())
    }
}

impl<D> std::fmt::Debug for ReconfigProxy<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconfigProxy")
            .field("identity", &self.identity)
            .field("version", &self.version.load(Ordering::Relaxed))
            .field("invalid", &self.invalid.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
