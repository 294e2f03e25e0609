//! Periodic sweep task.
//!
//! The scheduler owns a background tokio task that sleeps for the sweep
//! period and then runs one sweep on the blocking pool. Sweeps take
//! `std::sync` locks and may call into allocators, so they never run on an
//! async worker thread. A panicking sweep is logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warpgrid_pool_core::{PoolError, PoolResult};

use crate::resizer::SweepReport;

/// Something the scheduler can run periodically.
pub trait Sweep: Send + Sync + 'static {
    /// Name used in log records.
    fn name(&self) -> &str;

    /// Run one sweep.
    fn sweep(&self) -> SweepReport;
}

/// A running periodic sweep.
pub struct SweepScheduler {
    name: String,
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweepScheduler {
    /// Start sweeping every `interval` on the current tokio runtime.
    ///
    /// The first sweep runs one `interval` after start.
    pub fn start(sweep: Arc<dyn Sweep>, interval: Duration) -> PoolResult<Self> {
        let name = sweep.name().to_string();
        if interval.is_zero() {
            return Err(PoolError::Config(format!(
                "pool {name}: sweep interval must be positive"
            )));
        }

        let runtime = Handle::try_current().map_err(|e| {
            PoolError::NoRuntime(format!("pool {name}: cannot schedule resizer: {e}"))
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(run_sweep_loop(sweep, interval, shutdown_rx));

        info!(pool = %name, interval_ms = interval.as_millis() as u64, "resizer scheduled");
        Ok(Self {
            name,
            interval,
            shutdown_tx,
            handle,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the loop without waiting for an in-flight sweep.
    pub fn cancel(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
        info!(pool = %self.name, "resizer cancelled");
    }

    /// Stop the loop and wait for it to exit. An in-flight sweep completes
    /// first.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!(pool = %self.name, error = %e, "resizer task ended abnormally");
            }
        }
        info!(pool = %self.name, "resizer stopped");
    }
}

impl std::fmt::Debug for SweepScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepScheduler")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

async fn run_sweep_loop(
    sweep: Arc<dyn Sweep>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = sweep.name().to_string();
    debug!(pool = %name, "resizer loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let task = Arc::clone(&sweep);
                match tokio::task::spawn_blocking(move || task.sweep()).await {
                    Ok(report) if report.skipped => {
                        debug!(pool = %name, "resize skipped");
                    }
                    Ok(report) => {
                        debug!(
                            pool = %name,
                            removed = report.removed(),
                            created = report.created,
                            size = report.pool_size,
                            "resize finished"
                        );
                    }
                    Err(e) => {
                        warn!(pool = %name, error = %e, "resize failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(pool = %name, "resizer loop shutting down");
                break;
            }
        }
    }
}
