//! Eviction eligibility for idle resources.
//!
//! | prefer validate | allocator validates | under steady budget and valid | outcome |
//! |-----------------|---------------------|-------------------------------|---------|
//! | false           | —                   | —                             | evict   |
//! | true            | false               | —                             | evict   |
//! | true            | true                | true                          | keep    |
//! | true            | true                | false                         | evict   |
//!
//! Idle connections are re-validated instead of destroyed and recreated,
//! but only up to the steady pool size; beyond that they are recreated.

use std::time::{Duration, Instant};

use tracing::trace;
use warpgrid_pool_core::{PoolProperties, ResourceHandle, ResourceState};

/// Per-handle sweep decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eligibility {
    /// Idle timeout not yet reached.
    KeepIdle,
    /// Timed out, but validated and within the steady-size budget.
    KeepSteady,
    /// Remove from the pool.
    Evict,
}

/// Decision table for a handle whose idle timeout has elapsed.
///
/// Returns `true` when the handle should be removed.
pub fn eligible_for_removal(
    prefer_validate_over_recreate: bool,
    has_validating_allocator: bool,
    within_budget_and_valid: bool,
) -> bool {
    !(prefer_validate_over_recreate && has_validating_allocator && within_budget_and_valid)
}

/// Eligibility policy for one sweep, built from that sweep's properties.
#[derive(Clone, Copy, Debug)]
pub struct EligibilityPolicy {
    prefer_validate_over_recreate: bool,
    steady_pool_size: usize,
    idle_timeout: Duration,
}

impl EligibilityPolicy {
    pub fn new(props: &PoolProperties) -> Self {
        Self {
            prefer_validate_over_recreate: props.prefer_validate_over_recreate,
            steady_pool_size: props.steady_pool_size,
            idle_timeout: props.idle_timeout,
        }
    }

    /// Classify a handle. The caller holds the handle's lock (`state`).
    ///
    /// `valid_count` is the number of resources confirmed good so far in
    /// this sweep. A handle kept in the steady part has `last_validated`
    /// and `last_usage` stamped with `now`.
    pub fn classify<R>(
        &self,
        handle: &ResourceHandle<R>,
        state: &mut ResourceState,
        now: Instant,
        valid_count: usize,
    ) -> Eligibility {
        if now.saturating_duration_since(state.last_usage()) < self.idle_timeout {
            return Eligibility::KeepIdle;
        }

        let allocator = handle.allocator();
        let validating = allocator.supports_validation();

        // Only ask the allocator when the answer can change the outcome.
        let within_budget_and_valid = self.prefer_validate_over_recreate
            && validating
            && valid_count < self.steady_pool_size
            && allocator.is_valid(handle.resource());

        if eligible_for_removal(self.prefer_validate_over_recreate, validating, within_budget_and_valid) {
            if self.prefer_validate_over_recreate && validating {
                if valid_count < self.steady_pool_size {
                    trace!(handle = %handle.id(), "removing idle resource reported invalid");
                } else {
                    trace!(
                        handle = %handle.id(),
                        valid_count,
                        steady = self.steady_pool_size,
                        "removing idle resource, steady part already full"
                    );
                }
            }
            Eligibility::Evict
        } else {
            state.mark_validated(now);
            state.touch(now);
            Eligibility::KeepSteady
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use warpgrid_pool_core::{HandleId, ResourceAllocator};

    struct Validating {
        valid: AtomicBool,
        supports: bool,
        checks: AtomicUsize,
    }

    impl Validating {
        fn new(supports: bool, valid: bool) -> Arc<Self> {
            Arc::new(Self {
                valid: AtomicBool::new(valid),
                supports,
                checks: AtomicUsize::new(0),
            })
        }
    }

    impl ResourceAllocator<u64> for Validating {
        fn create(&self) -> anyhow::Result<u64> {
            Ok(0)
        }

        fn supports_validation(&self) -> bool {
            self.supports
        }

        fn is_valid(&self, _resource: &u64) -> bool {
            self.checks.fetch_add(1, Ordering::Relaxed);
            self.valid.load(Ordering::Relaxed)
        }
    }

    fn props(prefer: bool, steady: usize) -> PoolProperties {
        PoolProperties {
            steady_pool_size: steady,
            max_pool_size: 32,
            resize_quantity: 2,
            idle_timeout: Duration::from_millis(100),
            wait_queue_length: 0,
            prefer_validate_over_recreate: prefer,
        }
    }

    fn handle(alloc: Arc<Validating>) -> ResourceHandle<u64> {
        ResourceHandle::new(HandleId(1), 1u64, alloc)
    }

    // ── Decision table ──────────────────────────────────────────────

    #[test]
    fn decision_table() {
        assert!(eligible_for_removal(false, false, false));
        assert!(eligible_for_removal(false, true, true));
        assert!(eligible_for_removal(true, false, true));
        assert!(!eligible_for_removal(true, true, true));
        assert!(eligible_for_removal(true, true, false));
    }

    // ── classify ────────────────────────────────────────────────────

    #[test]
    fn recent_handle_is_kept_idle() {
        let h = handle(Validating::new(true, true));
        let now = h.state().last_usage() + Duration::from_millis(50);
        let policy = EligibilityPolicy::new(&props(true, 3));
        assert_eq!(policy.classify(&h, &mut h.state(), now, 0), Eligibility::KeepIdle);
    }

    #[test]
    fn timed_out_handle_evicted_without_preference() {
        let alloc = Validating::new(true, true);
        let h = handle(alloc.clone());
        let now = h.state().last_usage() + Duration::from_millis(150);
        let policy = EligibilityPolicy::new(&props(false, 3));
        assert_eq!(policy.classify(&h, &mut h.state(), now, 0), Eligibility::Evict);
        assert_eq!(alloc.checks.load(Ordering::Relaxed), 0, "no validation when not preferred");
    }

    #[test]
    fn timed_out_handle_evicted_when_allocator_cannot_validate() {
        let h = handle(Validating::new(false, true));
        let now = h.state().last_usage() + Duration::from_millis(150);
        let policy = EligibilityPolicy::new(&props(true, 3));
        assert_eq!(policy.classify(&h, &mut h.state(), now, 0), Eligibility::Evict);
    }

    #[test]
    fn valid_handle_within_budget_is_kept_and_stamped() {
        let h = handle(Validating::new(true, true));
        let now = h.state().last_usage() + Duration::from_millis(150);
        let policy = EligibilityPolicy::new(&props(true, 3));

        assert_eq!(policy.classify(&h, &mut h.state(), now, 2), Eligibility::KeepSteady);
        let state = h.state();
        assert_eq!(state.last_validated(), Some(now));
        assert_eq!(state.last_usage(), now);
    }

    #[test]
    fn invalid_handle_within_budget_is_evicted() {
        let h = handle(Validating::new(true, false));
        let now = h.state().last_usage() + Duration::from_millis(150);
        let policy = EligibilityPolicy::new(&props(true, 3));
        assert_eq!(policy.classify(&h, &mut h.state(), now, 0), Eligibility::Evict);
        assert!(h.state().last_validated().is_none());
    }

    #[test]
    fn valid_handle_beyond_budget_is_evicted_without_validation() {
        let alloc = Validating::new(true, true);
        let h = handle(alloc.clone());
        let now = h.state().last_usage() + Duration::from_millis(150);
        let policy = EligibilityPolicy::new(&props(true, 3));
        assert_eq!(policy.classify(&h, &mut h.state(), now, 3), Eligibility::Evict);
        assert_eq!(alloc.checks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn revalidating_twice_gives_same_outcome() {
        let h = handle(Validating::new(true, true));
        let now = h.state().last_usage() + Duration::from_millis(150);
        let policy = EligibilityPolicy::new(&props(true, 3));

        let first = policy.classify(&h, &mut h.state(), now, 1);
        // The first pass stamped last_usage, so the second pass looks again
        // once the idle timeout has elapsed a second time.
        let second = policy.classify(&h, &mut h.state(), now + Duration::from_millis(150), 1);
        assert_eq!(first, Eligibility::KeepSteady);
        assert_eq!(second, first);
    }
}
