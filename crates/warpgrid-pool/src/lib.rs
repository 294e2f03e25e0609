//! warpgrid-pool — pooled resource lifecycle management.
//!
//! [`ResourcePool`] hands out resources created by a
//! [`ResourceAllocator`](warpgrid_pool_core::ResourceAllocator), keeps the
//! pool between its steady and maximum sizes, and runs a periodic resizer
//! that evicts idle and invalid resources:
//!
//! ```text
//! init ──► prefill to steady ──► schedule resizer (every idle_timeout)
//!
//! try_acquire / acquire ──► free resource? ──► yes: validate, lease, touch
//!                                  │
//!                                  no ──► size < max? ──► create
//!                                              │
//!                                              no ──► thread-affine takeover, else
//!                                                     wait (counted in the wait queue)
//!
//! release(lease) ──► current borrow? ──► max usage reached? ──► destroy, top up
//!                                              │
//!                                              no ──► return to free set, wake one waiter
//! ```
//!
//! Reconfiguring a pool bumps its version; proxies built from
//! [`ResourcePool::reconfig_context`] refresh their delegate on their next
//! call and become invalid once the pool shuts down.

pub mod lease;
pub mod pool;
pub mod status;
pub mod telemetry;

pub use lease::PooledResource;
pub use pool::ResourcePool;
pub use status::PoolStatus;
pub use telemetry::init_tracing;

pub use warpgrid_pool_core::{
    HandleId, PoolConfig, PoolError, PoolResult, ResourceAllocator, ResourceHandle, StorageKind,
};
pub use warpgrid_resizer::SweepReport;
