//! Core probe trait and error types.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::sink::SinkError;

/// Errors raised by a single probe invocation.
///
/// These are contained failures: the scheduler records them and keeps the
/// probe on its period. Only [`ProbeError::Config`] raised at construction
/// time is fatal, and then only during startup.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Host metric read failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink rejected a gauge write.
    #[error("sink write failed: {0}")]
    Sink(#[from] SinkError),

    /// A probe argument was missing or malformed.
    #[error("probe config error: {0}")]
    Config(#[from] ConfigError),

    /// The probe's external collaborator is unavailable.
    #[error("{0}")]
    Unavailable(String),
}

/// A unit of periodic telemetry collection.
///
/// The scheduler invokes `sample` at the probe's fixed rate and `flush`
/// exactly once at shutdown. Invocations of one probe are never concurrent
/// with each other (the scheduler serializes them through a per-probe
/// mutex), so implementations may keep plain mutable state.
///
/// `sample` and `flush` may block on I/O; doing so only delays this
/// probe's own next invocation, never other probes'.
#[async_trait::async_trait]
pub trait Probe: Send + 'static {
    /// Probe type name; unique per running instance in the registry.
    fn name(&self) -> &str;

    /// Fixed sampling period.
    fn period(&self) -> Duration;

    /// Perform one sampling cycle.
    async fn sample(&mut self) -> Result<(), ProbeError>;

    /// Push any buffered data to the sink. Called once, best-effort, when
    /// the process shuts down.
    async fn flush(&mut self) -> Result<(), ProbeError>;
}
