//! Call-stack signature formatting and the include/exclude filter.
//!
//! A captured stack is flattened into a single line-level signature string
//! that doubles as the aggregation key: path separators are rewritten to
//! `-`, each frame carries its line number, frames are joined with `|` with
//! the innermost frame first.

use std::thread::ThreadId;

/// Module prefixes the agent always excludes so it never measures itself.
pub const EXCLUDE_PREFIXES: &[&str] = &["periscope", "backtrace"];

/// One resolved stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Fully qualified symbol path, `::`-separated.
    pub symbol: String,
    /// Source line, 0 when unknown.
    pub line: u32,
}

impl Frame {
    pub fn new(symbol: impl Into<String>, line: u32) -> Self {
        Self {
            symbol: symbol.into(),
            line,
        }
    }
}

/// A captured stack for a single thread, innermost frame first.
#[derive(Debug, Clone)]
pub struct ThreadStack {
    /// Identity of the thread the stack was captured from.
    pub thread: ThreadId,
    pub frames: Vec<Frame>,
}

/// Format a single frame, excluding path separators from the key alphabet.
pub fn format_frame(frame: &Frame) -> String {
    format!("{}-{}", frame.symbol.replace("::", "-"), frame.line)
}

/// Format an entire stack as one signature string.
pub fn format_stack(frames: &[Frame]) -> String {
    frames
        .iter()
        .map(format_frame)
        .collect::<Vec<_>>()
        .join("|")
}

/// Whitelist/blacklist decision over formatted signatures.
///
/// A signature is included iff no blacklisted prefix matches and, when the
/// whitelist is non-empty, at least one whitelisted prefix matches. An empty
/// whitelist means the blacklist alone governs. Blacklist precedence is
/// absolute.
#[derive(Debug, Clone)]
pub struct TraceFilter {
    whitelist: Vec<String>,
    blacklist: Vec<String>,
}

impl TraceFilter {
    /// Build a filter. Prefixes may be given in `.` or `::` path form;
    /// they are normalized to the signature alphabet. The agent's own
    /// prefixes are appended to the blacklist unconditionally.
    pub fn new(whitelist: Vec<String>, blacklist: Vec<String>) -> Self {
        fn normalize(p: String) -> String {
            p.replace("::", "-").replace('.', "-")
        }
        let whitelist = whitelist.into_iter().map(normalize).collect();
        let blacklist = blacklist
            .into_iter()
            .chain(EXCLUDE_PREFIXES.iter().map(|p| (*p).to_owned()))
            .map(normalize)
            .collect();
        Self {
            whitelist,
            blacklist,
        }
    }

    /// Decide whether a formatted signature is worth counting.
    pub fn include(&self, signature: &str) -> bool {
        if self.blacklist.iter().any(|p| signature.starts_with(p.as_str())) {
            return false;
        }
        if self.whitelist.is_empty() {
            return true;
        }
        self.whitelist.iter().any(|p| signature.starts_with(p.as_str()))
    }
}
