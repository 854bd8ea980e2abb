//! Trace-count aggregation for the CPU sampling probe.
//!
//! A thread-safe counting map keyed by formatted trace signatures. The
//! sampling loop increments counters at high frequency; the reporting path
//! periodically takes the whole map and resets it in one step.

use std::collections::HashMap;
use std::sync::Mutex;

/// Lexicographic key range covered by an aggregator.
///
/// Downstream flame-graph tooling uses this to know which key span a flush
/// covered without scanning every gauge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBounds {
    /// Lexicographically smallest key present.
    pub min: String,
    /// Lexicographically largest key present.
    pub max: String,
}

/// Thread-safe mapping from trace signature to a 64-bit sample counter.
///
/// `snapshot_and_reset` exchanges the entire map under the same lock that
/// `increment` takes, so a concurrent increment lands wholly on one side of
/// the boundary: either in the returned snapshot or in the fresh map, never
/// split and never lost.
#[derive(Debug, Default)]
pub struct TraceCounts {
    counts: Mutex<HashMap<String, u64>>,
}

impl TraceCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to the counter for `key`, creating it at `delta` if absent.
    pub fn increment(&self, key: &str, delta: u64) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        *counts.entry(key.to_owned()).or_insert(0) += delta;
    }

    /// Take the full current mapping and clear all counters.
    pub fn snapshot_and_reset(&self) -> HashMap<String, u64> {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *counts)
    }

    /// Lexicographic min/max key currently present, or `None` when empty.
    pub fn bounds(&self) -> Option<KeyBounds> {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let min = counts.keys().min()?.clone();
        let max = counts.keys().max().cloned().unwrap_or_else(|| min.clone());
        Some(KeyBounds { min, max })
    }

    /// Number of distinct keys currently held.
    pub fn len(&self) -> usize {
        self.counts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_creates_and_accumulates() {
        let counts = TraceCounts::new();
        counts.increment("a|b", 1);
        counts.increment("a|b", 2);
        counts.increment("c", 5);

        let snapshot = counts.snapshot_and_reset();
        assert_eq!(snapshot.get("a|b"), Some(&3));
        assert_eq!(snapshot.get("c"), Some(&5));
    }

    #[test]
    fn test_snapshot_resets() {
        let counts = TraceCounts::new();
        counts.increment("a", 1);
        assert_eq!(counts.snapshot_and_reset().len(), 1);
        assert!(counts.snapshot_and_reset().is_empty());
        assert!(counts.is_empty());
    }

    #[test]
    fn test_bounds() {
        let counts = TraceCounts::new();
        counts.increment("b", 1);
        counts.increment("a", 1);
        counts.increment("c", 1);

        let bounds = counts.bounds().unwrap();
        assert_eq!(bounds.min, "a");
        assert_eq!(bounds.max, "c");
    }

    #[test]
    fn test_bounds_empty() {
        let counts = TraceCounts::new();
        assert_eq!(counts.bounds(), None);
    }

    #[test]
    fn test_no_increment_lost_across_reset() {
        // Hammer one key from several threads while another thread keeps
        // swapping the map out. The snapshots plus the final residue must
        // account for every increment exactly once.
        let counts = Arc::new(TraceCounts::new());
        let total_per_thread = 10_000u64;
        let writers = 4;

        let mut handles = Vec::new();
        for _ in 0..writers {
            let counts = Arc::clone(&counts);
            handles.push(std::thread::spawn(move || {
                for _ in 0..total_per_thread {
                    counts.increment("hot", 1);
                }
            }));
        }

        let snapshotter = {
            let counts = Arc::clone(&counts);
            std::thread::spawn(move || {
                let mut seen = 0u64;
                for _ in 0..100 {
                    seen += counts.snapshot_and_reset().get("hot").copied().unwrap_or(0);
                    std::thread::yield_now();
                }
                seen
            })
        };

        for h in handles {
            h.join().unwrap();
        }
        let mut seen = snapshotter.join().unwrap();
        seen += counts.snapshot_and_reset().get("hot").copied().unwrap_or(0);

        assert_eq!(seen, total_per_thread * writers as u64);
    }
}
