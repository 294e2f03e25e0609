//! warpgrid-pool-storage — `PoolStorage` implementations.
//!
//! - [`FreeListStorage`] keeps free handles in a shared queue; any borrower
//!   may take any free handle.
//! - [`AffineStorage`] has no free queue. Borrowers scan for a non-busy
//!   handle, preferring the one already associated with their thread, and a
//!   returned handle keeps its association until the resizer clears it.

pub mod affine;
pub mod free_list;

pub use affine::AffineStorage;
pub use free_list::FreeListStorage;

use std::sync::Arc;

use warpgrid_pool_core::{PoolConfig, PoolStorage, StorageKind};

/// Build the storage a pool config asks for.
pub fn storage_for<R: Send + Sync + 'static>(config: &PoolConfig) -> Arc<dyn PoolStorage<R>> {
    match config.storage {
        StorageKind::FreeList => Arc::new(FreeListStorage::new()),
        StorageKind::ThreadAffine => Arc::new(AffineStorage::new()),
    }
}
