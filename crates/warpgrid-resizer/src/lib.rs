//! warpgrid-resizer — periodic pool maintenance.
//!
//! A sweep removes idle and invalid resources, scales the pool down by at
//! most `resize_quantity`, and replenishes it back to `steady_pool_size`:
//!
//! ```text
//! resize(forced)
//!   wait_queue_length > 0          → skip (never shrink a starved pool)
//!   removed = remove_idle_and_invalid_resources()
//!   quota   = resize_quantity - removed
//!   forced && quota > 0            → scale_down_pool(min(quota, free - steady))
//!   size < steady_pool_size        → ensure_steady_pool()
//! ```
//!
//! Free-list pools are swept by draining the free list and returning what
//! survives. Thread-affine pools are never drained: the sweep walks a
//! snapshot of all handles, locking each, and removes victims only after
//! the scan.
//!
//! Sweeps run on a [`SweepScheduler`], which holds a plain [`Sweep`] and
//! calls it on a fixed period until shut down.

mod affine;
mod bulk;
pub mod eligibility;
pub mod resizer;
pub mod scheduler;

pub use eligibility::{Eligibility, EligibilityPolicy};
pub use resizer::{Resizer, SweepReport};
pub use scheduler::{Sweep, SweepScheduler};
