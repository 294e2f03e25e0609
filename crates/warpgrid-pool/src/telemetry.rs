//! Tracing setup for binaries and tests embedding a pool.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "info,warpgrid_pool=debug,warpgrid_resizer=debug";

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `directives`. Returns `false` if a global subscriber was already set.
pub fn init_tracing(directives: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .is_ok()
}
