//! Periscope - in-process telemetry agent
//!
//! Periscope runs a set of periodic probe tasks inside a long-lived host
//! process, aggregates what each probe observes into named numeric gauges,
//! and forwards snapshots to a pluggable metrics sink. An HTTP control
//! plane lets an operator list, disable, re-enable (with fresh arguments),
//! and inspect probes while the process keeps running; a shutdown
//! coordinator guarantees a best-effort final flush before exit.
//!
//! # Architecture
//!
//! - **Probes**: periodic collection bodies (`cpu` stack sampling,
//!   `memory` process gauges) behind the [`probe::Probe`] trait
//! - **Scheduler**: fixed-rate, per-probe-serialized execution on tokio
//! - **Registry**: the live name → probe set the control plane mutates
//! - **Sink**: pluggable gauge backend (tracing log, statsd UDP)
//! - **Control plane**: plain-text HTTP surface for live operation
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use periscope::{Agent, Arguments};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let arguments = Arguments::parse("server=statsd.local,port=8125,probes=memory")?;
//!     let agent = Arc::new(Agent::new(arguments)?);
//!     agent.start().await?;
//!
//!     let listener = periscope::server::bind(5005).await?;
//!     let router = periscope::server::create_router(Arc::clone(&agent));
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod aggregate;
pub mod config;
pub mod errlog;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod sink;
pub mod trace;

pub use agent::{Agent, AgentError, EnableOutcome};
pub use aggregate::{KeyBounds, TraceCounts};
pub use config::{Arguments, ConfigError, ConfigStore};
pub use errlog::ErrorLog;
pub use probe::{Probe, ProbeError, ProbeKind, StackSource};
pub use registry::ProbeRegistry;
pub use scheduler::{ProbeCell, ProbeHandle, Scheduler, WorkerThreads};
pub use shutdown::ShutdownCoordinator;
pub use sink::{Sink, SinkError, SinkKind};
pub use trace::{Frame, ThreadStack, TraceFilter};
