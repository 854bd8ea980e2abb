//! Process memory probe.
//!
//! Reads the host process's memory counters from `/proc/self/status` and
//! reports them as `mem.*` gauges every period. A plain read-and-format
//! body with no buffering, so `flush` is just one more report.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Arguments;
use crate::probe::traits::{Probe, ProbeError};
use crate::sink::Sink;

/// Default reporting period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(10);

const PERIOD_ARG: &str = "memory-period";
const FALLBACK_PERIOD_ARG: &str = "period";

/// Which `/proc/self/status` fields are reported, and under which gauge key.
const FIELDS: &[(&str, &str)] = &[
    ("VmRSS", "mem.rss"),
    ("VmSize", "mem.vsize"),
    ("VmHWM", "mem.rss.peak"),
    ("VmData", "mem.data"),
    ("VmStk", "mem.stack"),
    ("Threads", "threads"),
];

/// Probe reporting resident/virtual memory and thread-count gauges.
pub struct MemoryProbe {
    sink: Arc<dyn Sink>,
    period: Duration,
}

impl MemoryProbe {
    /// Build from the argument snapshot. The period comes from
    /// `memory-period`, falling back to the shared `period` key, then the
    /// default.
    pub fn new(sink: Arc<dyn Sink>, args: &Arguments) -> Result<Self, ProbeError> {
        let period = match args.get_duration(PERIOD_ARG)? {
            Some(period) => period,
            None => args
                .get_duration(FALLBACK_PERIOD_ARG)?
                .unwrap_or(DEFAULT_PERIOD),
        };
        Ok(Self { sink, period })
    }

    fn record_stats(&self) -> Result<(), ProbeError> {
        let status = std::fs::read_to_string("/proc/self/status")?;
        let gauges = parse_status(&status);
        if gauges.is_empty() {
            return Err(ProbeError::Unavailable(
                "no recognized fields in /proc/self/status".to_owned(),
            ));
        }
        self.sink.gauges(&gauges)?;
        Ok(())
    }
}

/// Extract the reported fields. Sizes are in kB in `/proc`; values are
/// reported in bytes.
fn parse_status(status: &str) -> HashMap<String, i64> {
    let mut gauges = HashMap::new();
    for line in status.lines() {
        let Some((field, rest)) = line.split_once(':') else {
            continue;
        };
        let Some((_, key)) = FIELDS.iter().find(|(name, _)| *name == field) else {
            continue;
        };

        let mut parts = rest.split_whitespace();
        let Some(value) = parts.next().and_then(|v| v.parse::<i64>().ok()) else {
            continue;
        };
        let value = match parts.next() {
            Some("kB") => value * 1024,
            _ => value,
        };
        gauges.insert((*key).to_owned(), value);
    }
    gauges
}

#[async_trait::async_trait]
impl Probe for MemoryProbe {
    fn name(&self) -> &str {
        "memory"
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn sample(&mut self) -> Result<(), ProbeError> {
        self.record_stats()
    }

    async fn flush(&mut self) -> Result<(), ProbeError> {
        self.record_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<HashMap<String, i64>>);

    impl Sink for RecordingSink {
        fn gauge(&self, key: &str, value: i64) -> Result<(), crate::sink::SinkError> {
            self.0.lock().unwrap().insert(key.to_owned(), value);
            Ok(())
        }
    }

    #[test]
    fn test_parse_status() {
        let status = "Name:\tperiscope\nVmRSS:\t  2048 kB\nVmSize:\t  8192 kB\nThreads:\t5\nIgnored:\t1 kB\n";
        let gauges = parse_status(status);

        assert_eq!(gauges.get("mem.rss"), Some(&(2048 * 1024)));
        assert_eq!(gauges.get("mem.vsize"), Some(&(8192 * 1024)));
        assert_eq!(gauges.get("threads"), Some(&5));
        assert_eq!(gauges.len(), 3);
    }

    #[test]
    fn test_period_fallback_chain() {
        let sink: Arc<dyn Sink> = Arc::new(RecordingSink(Mutex::new(HashMap::new())));

        let args = Arguments::parse("server=s,port=1,memory-period=5s,period=30").unwrap();
        assert_eq!(
            MemoryProbe::new(Arc::clone(&sink), &args).unwrap().period(),
            Duration::from_secs(5)
        );

        let args = Arguments::parse("server=s,port=1,period=30").unwrap();
        assert_eq!(
            MemoryProbe::new(Arc::clone(&sink), &args).unwrap().period(),
            Duration::from_secs(30)
        );

        let args = Arguments::parse("server=s,port=1").unwrap();
        assert_eq!(
            MemoryProbe::new(sink, &args).unwrap().period(),
            DEFAULT_PERIOD
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_sample_reports_own_process() {
        let sink = Arc::new(RecordingSink(Mutex::new(HashMap::new())));
        let args = Arguments::parse("server=s,port=1").unwrap();
        let mut probe = MemoryProbe::new(Arc::clone(&sink) as Arc<dyn Sink>, &args).unwrap();

        probe.sample().await.unwrap();
        let gauges = sink.0.lock().unwrap();
        assert!(gauges.get("mem.rss").copied().unwrap_or(0) > 0);
    }
}
