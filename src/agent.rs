//! Agent wiring: builds the sink and probe set from arguments, schedules
//! probes, and carries the runtime operations the control plane calls.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::{Arguments, ConfigError, ConfigStore};
use crate::errlog::ErrorLog;
use crate::probe::{ProbeError, ProbeKind, StackSource};
use crate::registry::ProbeRegistry;
use crate::scheduler::{ProbeCell, Scheduler};
use crate::shutdown::ShutdownCoordinator;
use crate::sink::{LogSink, Sink, SinkError, SinkKind, StatsdSink};

/// Agent-level errors. Configuration errors are fatal at startup and an
/// HTTP error body for dynamic enable; everything else stays contained.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Probe {0} not found")]
    UnknownProbe(String),

    #[error("Sink {0} not found")]
    UnknownSink(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("failed to bind control plane: {0}")]
    Bind(std::io::Error),
}

/// Result of a dynamic enable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    Enabled,
    /// The name already had a live registry entry; nothing was created.
    AlreadyRunning,
}

/// The in-process telemetry agent.
///
/// Owns the sink, the scheduler, the probe registry, the shared error log,
/// and the shutdown coordinator. The control plane holds an `Arc<Agent>`
/// and drives everything through these methods.
pub struct Agent {
    config: ConfigStore,
    sink: Arc<dyn Sink>,
    scheduler: Scheduler,
    registry: Arc<ProbeRegistry>,
    errors: ErrorLog,
    coordinator: ShutdownCoordinator,
    stack_source: Option<Arc<dyn StackSource>>,
    // Serializes dynamic enables so a name races to at most one entry.
    enable_lock: Mutex<()>,
}

impl Agent {
    /// Build an agent from parsed arguments. Resolves the sink eagerly so
    /// a bad sink type fails startup, not the first gauge write.
    pub fn new(arguments: Arguments) -> Result<Self, AgentError> {
        let sink = build_sink(&arguments)?;
        let errors = ErrorLog::new();
        let registry = Arc::new(ProbeRegistry::new());

        Ok(Self {
            config: ConfigStore::new(arguments),
            sink,
            scheduler: Scheduler::new(errors.clone()),
            registry: Arc::clone(&registry),
            errors: errors.clone(),
            coordinator: ShutdownCoordinator::new(registry, errors),
            stack_source: None,
            enable_lock: Mutex::new(()),
        })
    }

    /// Register the host's stack capture hook. Required before the cpu
    /// probe can be started.
    pub fn with_stack_source(mut self, source: Arc<dyn StackSource>) -> Self {
        self.stack_source = Some(source);
        self
    }

    /// Instantiate and schedule every probe named in the configuration.
    /// Unknown types or bad arguments abort startup.
    pub async fn start(&self) -> Result<(), AgentError> {
        let args = self.config.snapshot();
        for name in args.probes() {
            self.spawn_probe(&name, &args).await?;
            tracing::info!(probe = %name, "Probe started");
        }
        Ok(())
    }

    async fn spawn_probe(
        &self,
        name: &str,
        args: &Arguments,
    ) -> Result<Arc<ProbeCell>, AgentError> {
        let kind =
            ProbeKind::resolve(name).ok_or_else(|| AgentError::UnknownProbe(name.to_owned()))?;
        let probe = kind.build(
            Arc::clone(&self.sink),
            args,
            self.scheduler.workers(),
            self.stack_source.clone(),
        )?;

        let cell = Arc::new(ProbeCell::new(probe));
        let handle = self.scheduler.schedule(Arc::clone(&cell));
        self.registry.register(handle, Arc::clone(&cell)).await;
        Ok(cell)
    }

    /// Dynamically enable a probe with extra arguments merged into the
    /// process-wide set. A name that is already live is a no-op reported
    /// as [`EnableOutcome::AlreadyRunning`], never a duplicate.
    pub async fn enable(
        &self,
        name: &str,
        extra: HashMap<String, String>,
    ) -> Result<EnableOutcome, AgentError> {
        let _guard = self.enable_lock.lock().await;
        if self.registry.is_active(name).await {
            return Ok(EnableOutcome::AlreadyRunning);
        }

        // Resolve before merging so an unknown type has no side effects.
        let kind =
            ProbeKind::resolve(name).ok_or_else(|| AgentError::UnknownProbe(name.to_owned()))?;
        let args = self.config.merge(&extra)?;

        let probe = kind.build(
            Arc::clone(&self.sink),
            &args,
            self.scheduler.workers(),
            self.stack_source.clone(),
        )?;
        let cell = Arc::new(ProbeCell::new(probe));
        let handle = self.scheduler.schedule(Arc::clone(&cell));
        self.registry.register(handle, cell).await;

        tracing::info!(probe = %name, "Probe enabled");
        Ok(EnableOutcome::Enabled)
    }

    /// Cancel a probe's schedule. The instance stays registered so
    /// `/status` keeps serving its final count. Returns false if the name
    /// had no schedule to cancel. An in-flight invocation completes
    /// normally.
    pub async fn disable(&self, name: &str) -> bool {
        let removed = self.registry.unregister(name).await.is_some();
        if removed {
            tracing::info!(probe = %name, "Probe disabled");
        }
        removed
    }

    /// Completed invocation count for `/status`, if the probe is known.
    pub async fn sample_count(&self, name: &str) -> Option<u64> {
        Some(self.registry.cell(name).await?.samples())
    }

    pub async fn list_active(&self) -> Vec<String> {
        self.registry.list_active().await
    }

    pub fn is_running(&self) -> bool {
        self.coordinator.is_running()
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProbeRegistry> {
        &self.registry
    }

    /// Fire the shutdown hook: flip the running flag and flush every
    /// probe once, best-effort. Idempotent.
    pub async fn shutdown(&self) {
        self.coordinator.run().await;
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn build_sink(args: &Arguments) -> Result<Arc<dyn Sink>, AgentError> {
    let kind = SinkKind::resolve(args.sink())
        .ok_or_else(|| AgentError::UnknownSink(args.sink().to_owned()))?;
    Ok(match kind {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Statsd => Arc::new(StatsdSink::new(
            args.server(),
            args.port()?,
            args.prefix(),
        )?),
    })
}
