//! CPU time sampling probe.
//!
//! On each sampling tick the probe captures call stacks from a
//! [`StackSource`], drops stacks belonging to the agent's own worker
//! threads, filters the formatted signatures through the package
//! whitelist/blacklist, and counts survivors in a [`TraceCounts`]
//! aggregator. Aggregated counts are reported to the sink on a coarser
//! cadence than sampling so the backend is not overwhelmed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::TraceCounts;
use crate::config::Arguments;
use crate::probe::traits::{Probe, ProbeError};
use crate::scheduler::WorkerThreads;
use crate::sink::Sink;
use crate::trace::{format_stack, ThreadStack, TraceFilter};

/// Default sampling period.
pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_millis(10);
/// How often aggregated counts are reported to the sink.
pub const REPORTING_PERIOD: Duration = Duration::from_secs(1);
/// Gauge key prefix for trace counts.
pub const TRACE_KEY_PREFIX: &str = "cpu.trace";

const WHITELIST_ARG: &str = "package_whitelist";
const BLACKLIST_ARG: &str = "package_blacklist";
const PERIOD_ARG: &str = "cpu-period";

/// Supplier of captured call stacks.
///
/// Stack capture is an external collaborator: the embedding process knows
/// how to observe its own threads (a signal-based sampler, a runtime hook,
/// a test fixture). The probe only consumes the result.
pub trait StackSource: Send + Sync + 'static {
    /// Stacks of all currently runnable threads, innermost frame first.
    fn capture(&self) -> Vec<ThreadStack>;
}

impl<F> StackSource for F
where
    F: Fn() -> Vec<ThreadStack> + Send + Sync + 'static,
{
    fn capture(&self) -> Vec<ThreadStack> {
        self()
    }
}

/// Probe that aggregates sampled call stacks into per-signature counters.
pub struct CpuSampleProbe {
    traces: TraceCounts,
    filter: TraceFilter,
    source: Arc<dyn StackSource>,
    sink: Arc<dyn Sink>,
    workers: WorkerThreads,
    period: Duration,
    report_every: u64,
    samples_since_report: u64,
}

impl CpuSampleProbe {
    /// Build from the argument snapshot. `package_whitelist` and
    /// `package_blacklist` are colon-delimited package prefixes;
    /// `cpu-period` overrides the sampling period.
    pub fn new(
        sink: Arc<dyn Sink>,
        args: &Arguments,
        source: Arc<dyn StackSource>,
        workers: WorkerThreads,
    ) -> Result<Self, ProbeError> {
        let period = args.get_duration(PERIOD_ARG)?.unwrap_or(DEFAULT_SAMPLE_PERIOD);
        let filter = TraceFilter::new(args.get_list(WHITELIST_ARG), args.get_list(BLACKLIST_ARG));
        let report_every =
            (REPORTING_PERIOD.as_nanos() / period.as_nanos().max(1)).max(1) as u64;

        Ok(Self {
            traces: TraceCounts::new(),
            filter,
            source,
            sink,
            workers,
            period,
            report_every,
            samples_since_report: 0,
        })
    }

    /// Flush aggregated counts to the sink as `cpu.trace.<signature>` gauges.
    fn report(&self) -> Result<(), ProbeError> {
        let snapshot = self.traces.snapshot_and_reset();
        if snapshot.is_empty() {
            return Ok(());
        }

        let gauges: HashMap<String, i64> = snapshot
            .into_iter()
            .map(|(sig, count)| (format!("{TRACE_KEY_PREFIX}.{sig}"), count as i64))
            .collect();
        self.sink.gauges(&gauges)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Probe for CpuSampleProbe {
    fn name(&self) -> &str {
        "cpu"
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn sample(&mut self) -> Result<(), ProbeError> {
        for stack in self.source.capture() {
            // Skip the agent's own worker threads and empty captures.
            if stack.frames.is_empty() || self.workers.contains(stack.thread) {
                continue;
            }
            let signature = format_stack(&stack.frames);
            if self.filter.include(&signature) {
                self.traces.increment(&signature, 1);
            }
        }

        self.samples_since_report += 1;
        if self.samples_since_report >= self.report_every {
            self.samples_since_report = 0;
            self.report()?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ProbeError> {
        // Bounds are read before the reset empties the map. They are
        // emitted as marker gauges so flame-graph tooling knows the key
        // span without scanning, for backends that cannot compute it.
        let bounds = self.traces.bounds();
        self.report()?;

        if self.sink.emit_bounds() {
            if let Some(bounds) = bounds {
                self.sink.gauge(&format!("{TRACE_KEY_PREFIX}.{}", bounds.min), 1)?;
                self.sink.gauge(&format!("{TRACE_KEY_PREFIX}.{}", bounds.max), 1)?;
            }
        }
        Ok(())
    }
}
