//! Version registry and delegate lookup collaborators.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::ReconfigResult;

/// Version reported for a resource identity that no longer exists.
pub const DEFUNCT: i64 = -1;

/// Authoritative reconfiguration versions, keyed by resource identity.
pub trait VersionRegistry: Send + Sync {
    /// Current version for `identity`, or [`DEFUNCT`].
    fn current_version(&self, identity: &str) -> i64;
}

/// Options passed to [`DelegateLookup::lookup`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LookupOptions {
    /// Return the raw delegate, not another proxy around it.
    pub skip_proxy: bool,
}

/// Resolves a resource identity to a fresh delegate.
pub trait DelegateLookup<D>: Send + Sync {
    fn lookup(&self, identity: &str, options: &LookupOptions) -> ReconfigResult<Arc<D>>;
}

impl<D, F> DelegateLookup<D> for F
where
    F: Fn(&str, &LookupOptions) -> ReconfigResult<Arc<D>> + Send + Sync,
{
    fn lookup(&self, identity: &str, options: &LookupOptions) -> ReconfigResult<Arc<D>> {
        self(identity, options)
    }
}

/// Collaborators shared by every proxy of a pool.
pub struct ReconfigContext<D> {
    pub registry: Arc<dyn VersionRegistry>,
    pub lookup: Arc<dyn DelegateLookup<D>>,
}

impl<D> ReconfigContext<D> {
    pub fn new(registry: Arc<dyn VersionRegistry>, lookup: Arc<dyn DelegateLookup<D>>) -> Self {
        Self { registry, lookup }
    }
}

impl<D> Clone for ReconfigContext<D> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            lookup: Arc::clone(&self.lookup),
        }
    }
}

/// In-memory registry. Unknown identities are defunct.
#[derive(Debug, Default)]
pub struct InMemoryVersionRegistry {
    versions: RwLock<HashMap<String, i64>>,
}

impl InMemoryVersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity` at `version`.
    pub fn register(&self, identity: impl Into<String>, version: i64) {
        self.write().insert(identity.into(), version);
    }

    /// Increment the version of `identity`, returning the new version.
    /// Defunct and unknown identities stay defunct.
    pub fn bump(&self, identity: &str) -> i64 {
        let mut versions = self.write();
        match versions.get_mut(identity) {
            Some(v) if *v != DEFUNCT => {
                *v += 1;
                *v
            }
            _ => DEFUNCT,
        }
    }

    pub fn mark_defunct(&self, identity: &str) {
        self.write().insert(identity.to_string(), DEFUNCT);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, i64>> {
        self.versions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VersionRegistry for InMemoryVersionRegistry {
    fn current_version(&self, identity: &str) -> i64 {
        self.versions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .copied()
            .unwrap_or(DEFUNCT)
    }
}
