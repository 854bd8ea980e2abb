//! Fixed-rate probe scheduling.
//!
//! Each registered probe runs in its own tokio task, driven by a
//! [`tokio::time::interval`] at the probe's period. The first tick fires
//! immediately (zero initial delay) and the interval's default missed-tick
//! behavior gives fixed-rate semantics: when an invocation overruns its
//! period the next one is delayed, never skipped and never run
//! concurrently with it. Probes are serialized against themselves through
//! a per-probe mutex (shared with the shutdown flush) and run concurrently
//! against each other.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::ThreadId;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errlog::ErrorLog;
use crate::probe::{Probe, ProbeError};

/// Identities of threads currently executing probe work.
///
/// The scheduler registers the worker thread around each invocation; the
/// CPU sampling probe queries this to exclude the agent's own work from
/// captured stacks instead of matching thread names.
#[derive(Debug, Clone, Default)]
pub struct WorkerThreads {
    inner: Arc<StdMutex<HashSet<ThreadId>>>,
}

impl WorkerThreads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the calling thread until the returned guard drops.
    pub fn enter(&self) -> WorkerGuard {
        let id = std::thread::current().id();
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
        WorkerGuard {
            registry: self.clone(),
            id,
        }
    }

    /// Whether `id` is currently executing probe work.
    pub fn contains(&self, id: ThreadId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }
}

/// Removes the thread registration on drop.
#[derive(Debug)]
pub struct WorkerGuard {
    registry: WorkerThreads,
    id: ThreadId,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.registry
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// A scheduled probe instance: the probe itself behind its serialization
/// mutex, plus the counters the control plane reads.
pub struct ProbeCell {
    name: String,
    period: Duration,
    probe: Mutex<Box<dyn Probe>>,
    samples: AtomicU64,
    last_error: StdMutex<Option<String>>,
}

impl ProbeCell {
    pub fn new(probe: Box<dyn Probe>) -> Self {
        Self {
            name: probe.name().to_owned(),
            period: probe.period(),
            probe: Mutex::new(probe),
            samples: AtomicU64::new(0),
            last_error: StdMutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Completed invocation count; monotonically non-decreasing.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Acquire)
    }

    /// Most recent invocation failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_last_error(&self, message: String) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
    }

    /// Flush the probe. Takes the same mutex as periodic sampling, so a
    /// shutdown flush cannot interleave with an in-flight sample.
    pub async fn flush(&self) -> Result<(), ProbeError> {
        self.probe.lock().await.flush().await
    }
}

impl std::fmt::Debug for ProbeCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeCell")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("samples", &self.samples())
            .finish_non_exhaustive()
    }
}

/// Cancellation handle for a scheduled probe.
///
/// `cancel` stops future invocations; an invocation already in flight
/// completes normally, including any sink write it performs.
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    token: CancellationToken,
    done: Arc<AtomicBool>,
}

impl ProbeHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the probe loop has observed cancellation and exited.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Spawns and drives the per-probe loops.
///
/// Tasks run on the host's tokio runtime; they hold no resources that
/// would keep the process alive once the runtime is dropped.
#[derive(Debug, Clone)]
pub struct Scheduler {
    errors: ErrorLog,
    workers: WorkerThreads,
}

impl Scheduler {
    pub fn new(errors: ErrorLog) -> Self {
        Self {
            errors,
            workers: WorkerThreads::new(),
        }
    }

    /// The worker-thread registry probes use for self-exclusion.
    pub fn workers(&self) -> WorkerThreads {
        self.workers.clone()
    }

    /// Start a fixed-rate repeating invocation of the cell's probe and
    /// return its cancellation handle.
    pub fn schedule(&self, cell: Arc<ProbeCell>) -> ProbeHandle {
        let token = CancellationToken::new();
        let done = Arc::new(AtomicBool::new(false));
        let handle = ProbeHandle {
            token: token.clone(),
            done: Arc::clone(&done),
        };

        let errors = self.errors.clone();
        let workers = self.workers.clone();
        tokio::spawn(async move {
            run_probe_loop(cell, token, errors, workers).await;
            done.store(true, Ordering::Release);
        });

        handle
    }
}

/// Drive one probe until cancelled. A failed invocation is recorded and
/// the probe stays on its period; it never cancels the task.
async fn run_probe_loop(
    cell: Arc<ProbeCell>,
    token: CancellationToken,
    errors: ErrorLog,
    workers: WorkerThreads,
) {
    let mut ticker = tokio::time::interval(cell.period());
    tracing::debug!(probe = %cell.name(), period = ?cell.period(), "Probe scheduled");

    loop {
        // Biased so a cancel always beats a tick that is already pending.
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mut probe = cell.probe.lock().await;
        let _guard = workers.enter();
        match probe.sample().await {
            Ok(()) => {
                cell.samples.fetch_add(1, Ordering::Release);
            }
            Err(e) => {
                tracing::warn!(probe = %cell.name(), error = %e, "Probe invocation failed");
                errors.record(format!("{}: {}", cell.name(), e));
                cell.set_last_error(e.to_string());
            }
        }
    }

    tracing::debug!(probe = %cell.name(), "Probe loop stopped");
}
