//! warpgrid-pool-core — shared types for the WarpGrid resource pool.
//!
//! Defines the unit of pooling (`ResourceHandle` + `ResourceState`), the
//! per-sweep `PoolProperties` snapshot, and the collaborator traits the
//! resizer and pool facade are written against:
//!
//! ```text
//! ResourceAllocator  — creates, validates, and destroys raw resources
//! ResourceHandler    — pool-side hooks used by the resizer (create + add, batch validation)
//! PoolStorage        — thread-safe container of handles (free vs. in-use membership)
//! PropertiesSource   — read-only PoolProperties snapshot per sweep
//! ```
//!
//! Every mutation of a handle's state happens under that handle's own lock;
//! nothing here takes a pool-wide lock.

pub mod allocator;
pub mod config;
pub mod error;
pub mod handle;
pub mod properties;
pub mod storage;

pub use allocator::{ResourceAllocator, ResourceHandler};
pub use config::{PoolConfig, StorageKind, parse_duration};
pub use error::{PoolError, PoolResult};
pub use handle::{HandleId, ResourceHandle, ResourceState};
pub use properties::{PoolProperties, PropertiesSource};
pub use storage::PoolStorage;
