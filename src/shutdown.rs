//! Process-exit coordination: flip the running flag, flush every probe
//! once, best-effort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errlog::ErrorLog;
use crate::registry::ProbeRegistry;

/// One-shot shutdown hook.
///
/// The first `run` flips the global running flag to false and flushes
/// every probe currently in the registry. Each flush is isolated: one
/// probe failing does not stop the others, and failures are recorded
/// rather than propagated. Later calls are no-ops.
pub struct ShutdownCoordinator {
    registry: Arc<ProbeRegistry>,
    errors: ErrorLog,
    running: Arc<AtomicBool>,
    fired: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<ProbeRegistry>, errors: ErrorLog) -> Self {
        Self {
            registry,
            errors,
            running: Arc::new(AtomicBool::new(true)),
            fired: AtomicBool::new(false),
        }
    }

    /// The process-wide running flag: true from startup until shutdown.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Fire the hook. Only the first call does anything.
    pub async fn run(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(false, Ordering::Release);
        tracing::info!("Shutting down, flushing probe data");

        for cell in self.registry.cells().await {
            if let Err(e) = cell.flush().await {
                tracing::warn!(probe = %cell.name(), error = %e, "Shutdown flush failed");
                self.errors.record(format!("{}: flush failed: {}", cell.name(), e));
            }
        }
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
