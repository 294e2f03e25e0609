//! warpgrid-reconfig — transparent delegate refresh for pooled resources.
//!
//! A [`ReconfigProxy`] is the stable handle application code holds. Before
//! each call it compares its cached version against the pool's
//! [`VersionRegistry`]; when the pool was reconfigured it looks up a fresh
//! delegate and swaps it in place. A defunct identity invalidates the proxy
//! for good.

pub mod error;
pub mod proxy;
pub mod registry;

pub use error::{ReconfigError, ReconfigResult};
pub use proxy::{Delegate, Operation, ReconfigProxy};
pub use registry::{
    DEFUNCT, DelegateLookup, InMemoryVersionRegistry, LookupOptions, ReconfigContext,
    VersionRegistry,
};
