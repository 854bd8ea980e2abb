//! Gauge sink interface and the built-in backends.
//!
//! Probes hand named numeric gauges to a [`Sink`]; everything past that
//! boundary (wire format, batching, the backend itself) is the sink's
//! business. The agent ships a tracing-backed sink for standalone runs and
//! a minimal statsd UDP sink.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::str::FromStr;

use strum_macros::EnumString;
use thiserror::Error;

/// Name qualifier accepted in front of sink type names.
pub const SINK_NAMESPACE: &str = "periscope.sink.";

/// Errors raised while writing gauges to a backend.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Network I/O failure.
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink could not be constructed from the supplied arguments.
    #[error("sink config error: {0}")]
    Config(String),
}

/// Destination for gauge snapshots.
///
/// Implementations must tolerate concurrent calls; the agent invokes sinks
/// from multiple probe loops.
pub trait Sink: Send + Sync + 'static {
    /// Write a single named gauge.
    fn gauge(&self, key: &str, value: i64) -> Result<(), SinkError>;

    /// Write a batch of gauges. The default writes them one by one.
    fn gauges(&self, values: &HashMap<String, i64>) -> Result<(), SinkError> {
        for (key, value) in values {
            self.gauge(key, *value)?;
        }
        Ok(())
    }

    /// Whether this backend wants explicit key-range bound gauges emitted.
    /// Backends that can compute ranges themselves opt out.
    fn emit_bounds(&self) -> bool {
        false
    }
}

/// Built-in sink types, resolvable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SinkKind {
    /// Emit gauges through `tracing`.
    Log,
    /// Emit statsd gauge datagrams over UDP.
    Statsd,
}

impl SinkKind {
    /// Resolve a sink type name, accepting the namespace-qualified form
    /// with a fallback to the bare name.
    pub fn resolve(name: &str) -> Option<Self> {
        let short = name.strip_prefix(SINK_NAMESPACE).unwrap_or(name);
        Self::from_str(short).ok()
    }
}

/// Sink that logs gauges through `tracing` at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn gauge(&self, key: &str, value: i64) -> Result<(), SinkError> {
        tracing::info!(gauge = %key, value, "gauge");
        Ok(())
    }
}

/// Maximum statsd datagram payload. Batches are split to stay under it.
const MAX_DATAGRAM: usize = 1432;

/// Minimal statsd gauge writer over UDP.
pub struct StatsdSink {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdSink {
    /// Connect a UDP socket to the statsd host and remember the prefix.
    pub fn new(host: &str, port: u16, prefix: &str) -> Result<Self, SinkError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((host, port))?;
        Ok(Self {
            socket,
            prefix: prefix.to_owned(),
        })
    }

    fn line(&self, key: &str, value: i64) -> String {
        format!("{}.{}:{}|g", self.prefix, key, value)
    }
}

impl std::fmt::Debug for StatsdSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsdSink")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl Sink for StatsdSink {
    fn gauge(&self, key: &str, value: i64) -> Result<(), SinkError> {
        self.socket.send(self.line(key, value).as_bytes())?;
        Ok(())
    }

    fn gauges(&self, values: &HashMap<String, i64>) -> Result<(), SinkError> {
        let mut buffer = String::new();
        for (key, value) in values {
            let line = self.line(key, *value);
            if !buffer.is_empty() && buffer.len() + line.len() + 1 > MAX_DATAGRAM {
                self.socket.send(buffer.as_bytes())?;
                buffer.clear();
            }
            if !buffer.is_empty() {
                buffer.push('\n');
            }
            buffer.push_str(&line);
        }
        if !buffer.is_empty() {
            self.socket.send(buffer.as_bytes())?;
        }
        Ok(())
    }

    fn emit_bounds(&self) -> bool {
        // statsd backends have no range query; emit marker gauges.
        true
    }
}
