//! Probe type resolution and construction.
//!
//! Probe types are a fixed enum resolved from a string name, accepting the
//! namespace-qualified `periscope.probe.<name>` form with a fallback to
//! the bare name. Unknown names are configuration errors at the point of
//! instantiation.

use std::str::FromStr;
use std::sync::Arc;

use strum_macros::EnumString;

use crate::config::Arguments;
use crate::probe::cpu::{CpuSampleProbe, StackSource};
use crate::probe::memory::MemoryProbe;
use crate::probe::traits::{Probe, ProbeError};
use crate::scheduler::WorkerThreads;
use crate::sink::Sink;

/// Name qualifier accepted in front of probe type names.
pub const PROBE_NAMESPACE: &str = "periscope.probe.";

/// Built-in probe types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProbeKind {
    /// Call-stack sampling aggregated by trace signature.
    Cpu,
    /// Process memory gauges.
    Memory,
}

impl ProbeKind {
    /// Resolve a probe type name; `None` means "type not found".
    pub fn resolve(name: &str) -> Option<Self> {
        let short = name.strip_prefix(PROBE_NAMESPACE).unwrap_or(name);
        Self::from_str(short).ok()
    }

    /// Instantiate a probe of this kind from an argument snapshot.
    ///
    /// The cpu probe needs a [`StackSource`]; constructing it without one
    /// is a configuration error, surfaced the same way as an unknown type.
    pub fn build(
        self,
        sink: Arc<dyn Sink>,
        args: &Arguments,
        workers: WorkerThreads,
        stack_source: Option<Arc<dyn StackSource>>,
    ) -> Result<Box<dyn Probe>, ProbeError> {
        match self {
            ProbeKind::Cpu => {
                let source = stack_source.ok_or_else(|| {
                    ProbeError::Unavailable(
                        "cpu probe requires a stack source registered by the host".to_owned(),
                    )
                })?;
                Ok(Box::new(CpuSampleProbe::new(sink, args, source, workers)?))
            }
            ProbeKind::Memory => Ok(Box::new(MemoryProbe::new(sink, args)?)),
        }
    }
}
