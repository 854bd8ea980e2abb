//! Bounded, shared log of recent probe failures.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// How many failures the log retains.
pub const CAPACITY: usize = 10;

/// Append-only sequence of the most recent probe failures, shared between
/// scheduler loops, the control plane, and the shutdown path.
///
/// Holds at most [`CAPACITY`] entries; the oldest entry is evicted first.
/// Cloning is cheap and all clones share the same backing storage.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    entries: Arc<Mutex<VecDeque<String>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a failure description, evicting the oldest entry at capacity.
    pub fn record(&self, message: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == CAPACITY {
            entries.pop_front();
        }
        entries.push_back(message.into());
    }

    /// Current entries in insertion order.
    pub fn snapshot(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot_order() {
        let log = ErrorLog::new();
        log.record("first");
        log.record("second");
        assert_eq!(log.snapshot(), vec!["first", "second"]);
    }

    #[test]
    fn test_fifo_eviction_keeps_most_recent() {
        let log = ErrorLog::new();
        for i in 0..CAPACITY + 3 {
            log.record(format!("error {i}"));
        }

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), CAPACITY);
        assert_eq!(snapshot.first().unwrap(), "error 3");
        assert_eq!(snapshot.last().unwrap(), &format!("error {}", CAPACITY + 2));
    }

    #[test]
    fn test_clones_share_storage() {
        let log = ErrorLog::new();
        let other = log.clone();
        other.record("shared");
        assert_eq!(log.snapshot(), vec!["shared"]);
    }
}
